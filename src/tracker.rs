use crate::{
    config::TrackerConfig,
    detector::{BoxPrediction, RawDetection},
};

#[derive(Debug, Clone)]
struct Track {
    id: Option<u64>,
    bbox: BoxPrediction,
    hits: u32,
    frames_since_seen: u32,
}

impl Track {
    fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }
}

/// Per-session identity continuity. Associates each frame's boxes with the
/// tracks of previous frames by greedy per-class IoU matching.
///
/// Ids are handed out when a track is confirmed, increase monotonically and
/// are never reused within one tracker. A tracker is bound to the model
/// generation it was last fed from and starts over when that changes.
#[derive(Debug)]
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    frames_seen: u64,
    generation: Option<u64>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            frames_seen: 0,
            generation: None,
        }
    }

    fn reset(&mut self, generation: u64) {
        if self.generation.is_some() {
            tracing::debug!(generation, "Model changed, resetting tracker");
        }
        self.tracks.clear();
        self.next_id = 1;
        self.frames_seen = 0;
        self.generation = Some(generation);
    }

    fn confirm(&mut self, index: usize) {
        if self.tracks[index].id.is_none() {
            self.tracks[index].id = Some(self.next_id);
            self.next_id += 1;
        }
    }

    pub fn update(&mut self, generation: u64, boxes: &[BoxPrediction]) -> Vec<RawDetection> {
        if self.generation != Some(generation) {
            self.reset(generation);
        }
        self.frames_seen += 1;
        let first_frame = self.frames_seen == 1;

        let mut candidates = Vec::new();
        for (track_index, track) in self.tracks.iter().enumerate() {
            for (box_index, bbox) in boxes.iter().enumerate() {
                if track.bbox.class_id != bbox.class_id {
                    continue;
                }
                let iou = track.bbox.iou(bbox);
                if iou >= self.config.match_iou {
                    candidates.push((iou, track_index, box_index));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_matched = vec![false; self.tracks.len()];
        let mut box_track: Vec<Option<usize>> = vec![None; boxes.len()];
        for (_, track_index, box_index) in candidates {
            if track_matched[track_index] || box_track[box_index].is_some() {
                continue;
            }
            track_matched[track_index] = true;
            box_track[box_index] = Some(track_index);

            let track = &mut self.tracks[track_index];
            track.bbox = boxes[box_index];
            track.hits = track.hits.saturating_add(1);
            track.frames_since_seen = 0;
            if track.hits >= self.config.min_hits {
                self.confirm(track_index);
            }
        }

        for (track_index, matched) in track_matched.iter().enumerate() {
            if !matched {
                self.tracks[track_index].frames_since_seen += 1;
            }
        }

        for (box_index, bbox) in boxes.iter().enumerate() {
            if box_track[box_index].is_some() {
                continue;
            }
            self.tracks.push(Track {
                id: None,
                bbox: *bbox,
                hits: 1,
                frames_since_seen: 0,
            });
            let track_index = self.tracks.len() - 1;
            if first_frame || self.config.min_hits <= 1 {
                self.confirm(track_index);
            }
            box_track[box_index] = Some(track_index);
        }

        let detections = boxes
            .iter()
            .zip(&box_track)
            .map(|(bbox, track_index)| RawDetection {
                bbox: *bbox,
                track_id: track_index.and_then(|index| self.tracks[index].id),
            })
            .collect();

        // tentative tracks do not survive a miss, confirmed ones coast for max_age
        let max_age = self.config.max_age;
        self.tracks.retain(|track| {
            if track.is_confirmed() {
                track.frames_since_seen <= max_age
            } else {
                track.frames_since_seen == 0
            }
        });

        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, class_id: usize) -> BoxPrediction {
        BoxPrediction {
            x1: x,
            y1: 0.0,
            x2: x + 10.0,
            y2: 10.0,
            confidence: 0.9,
            class_id,
        }
    }

    fn ids(detections: &[RawDetection]) -> Vec<Option<u64>> {
        detections.iter().map(|d| d.track_id).collect()
    }

    #[test]
    fn test_first_frame_tracks_are_confirmed() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let out = tracker.update(1, &[bbox(0.0, 0), bbox(100.0, 1)]);
        assert_eq!(ids(&out), vec![Some(1), Some(2)]);

        let out = tracker.update(1, &[bbox(101.0, 1), bbox(1.0, 0)]);
        assert_eq!(ids(&out), vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_new_track_is_tentative_until_min_hits() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(1, &[bbox(0.0, 0)]);

        let out = tracker.update(1, &[bbox(0.0, 0), bbox(200.0, 0)]);
        assert_eq!(ids(&out), vec![Some(1), None]);

        let out = tracker.update(1, &[bbox(0.0, 0), bbox(201.0, 0)]);
        assert_eq!(ids(&out), vec![Some(1), Some(2)]);
    }

    #[test]
    fn test_classes_do_not_match_each_other() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(1, &[bbox(0.0, 0)]);

        let out = tracker.update(1, &[bbox(0.0, 1)]);
        assert_eq!(ids(&out), vec![None]);
    }

    #[test]
    fn test_lost_track_coasts_then_expires() {
        let config = TrackerConfig {
            max_age: 2,
            ..TrackerConfig::default()
        };
        let mut tracker = Tracker::new(config);
        tracker.update(1, &[bbox(0.0, 0)]);
        tracker.update(1, &[]);
        tracker.update(1, &[]);

        let out = tracker.update(1, &[bbox(0.0, 0)]);
        assert_eq!(ids(&out), vec![Some(1)]);

        for _ in 0..3 {
            tracker.update(1, &[]);
        }
        tracker.update(1, &[bbox(0.0, 0)]);
        let out = tracker.update(1, &[bbox(0.0, 0)]);
        assert_eq!(ids(&out), vec![Some(2)]);
    }

    #[test]
    fn test_long_lived_track_hit_count_saturates() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(1, &[bbox(0.0, 0)]);
        tracker.tracks[0].hits = u32::MAX;

        let out = tracker.update(1, &[bbox(0.0, 0)]);
        assert_eq!(ids(&out), vec![Some(1)]);
        assert_eq!(tracker.tracks[0].hits, u32::MAX);
    }

    #[test]
    fn test_generation_change_resets_identities() {
        let mut tracker = Tracker::new(TrackerConfig::default());
        tracker.update(1, &[bbox(0.0, 0), bbox(50.0, 0)]);
        tracker.update(1, &[bbox(0.0, 0), bbox(50.0, 0)]);

        let out = tracker.update(2, &[bbox(50.0, 0)]);
        assert_eq!(ids(&out), vec![Some(1)]);
    }
}
