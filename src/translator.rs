use crate::{detector::RawDetection, registry::ModelMetadata};
use serde::Serialize;
use std::collections::BTreeMap;

/// Track id reported for detections the tracker has not confirmed yet.
pub const UNTRACKED_ID: i64 = -1;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    #[serde(rename = "id")]
    pub track_key: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
    #[serde(rename = "stats")]
    pub class_counts: BTreeMap<String, u32>,
}

pub fn track_key(class_name: &str, track_id: Option<u64>) -> String {
    match track_id {
        Some(id) => format!("{}_{}", class_name, id),
        None => format!("{}_{}", class_name, UNTRACKED_ID),
    }
}

/// Maps raw tracked output onto the wire result for `metadata`'s label set.
/// Entries with a class id outside the label set are skipped.
pub fn translate(raw: &[RawDetection], metadata: &ModelMetadata) -> FrameResult {
    let mut class_counts: BTreeMap<String, u32> = metadata
        .class_labels
        .iter()
        .map(|label| (label.clone(), 0))
        .collect();

    let mut detections = Vec::with_capacity(raw.len());
    for detection in raw {
        let bbox = &detection.bbox;
        let Some(class_name) = metadata.class_labels.get(bbox.class_id) else {
            tracing::debug!(class_id = bbox.class_id, "Skipping detection with unknown class id");
            continue;
        };

        if let Some(count) = class_counts.get_mut(class_name) {
            *count += 1;
        }

        detections.push(Detection {
            track_key: track_key(class_name, detection.track_id),
            class_name: class_name.clone(),
            confidence: bbox.confidence,
            x: bbox.x1,
            y: bbox.y1,
            w: bbox.x2 - bbox.x1,
            h: bbox.y2 - bbox.y1,
        });
    }

    FrameResult {
        detections,
        class_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoxPrediction;

    fn metadata(labels: &[&str]) -> ModelMetadata {
        ModelMetadata::new("test.onnx", labels.iter().map(|l| l.to_string()).collect())
    }

    fn raw(class_id: usize, track_id: Option<u64>) -> RawDetection {
        RawDetection {
            bbox: BoxPrediction {
                x1: 10.0,
                y1: 20.0,
                x2: 110.0,
                y2: 70.0,
                confidence: 0.9,
                class_id,
            },
            track_id,
        }
    }

    #[test]
    fn test_single_tracked_car() {
        let result = translate(&[raw(0, Some(5))], &metadata(&["car", "person"]));

        assert_eq!(result.class_counts["car"], 1);
        assert_eq!(result.class_counts["person"], 0);
        assert_eq!(result.class_counts.len(), 2);
        assert_eq!(result.detections.len(), 1);

        let detection = &result.detections[0];
        assert_eq!(detection.track_key, "car_5");
        assert_eq!(detection.class_name, "car");
        assert_eq!(
            (detection.x, detection.y, detection.w, detection.h),
            (10.0, 20.0, 100.0, 50.0)
        );
    }

    #[test]
    fn test_empty_frame_reports_every_class() {
        let result = translate(&[], &metadata(&["car", "person", "bus"]));

        assert!(result.detections.is_empty());
        assert_eq!(result.class_counts.len(), 3);
        assert!(result.class_counts.values().all(|count| *count == 0));
    }

    #[test]
    fn test_missing_track_id_uses_sentinel() {
        let result = translate(&[raw(1, None)], &metadata(&["car", "person"]));
        assert_eq!(result.detections[0].track_key, "person_-1");
    }

    #[test]
    fn test_unknown_class_is_skipped_and_order_kept() {
        let result = translate(
            &[raw(1, Some(1)), raw(7, Some(2)), raw(0, Some(3)), raw(1, Some(4))],
            &metadata(&["car", "person"]),
        );

        let keys: Vec<_> = result.detections.iter().map(|d| d.track_key.as_str()).collect();
        assert_eq!(keys, vec!["person_1", "car_3", "person_4"]);
        assert_eq!(result.class_counts["person"], 2);
        assert_eq!(result.class_counts["car"], 1);
    }

    #[test]
    fn test_wire_format() {
        let result = translate(&[raw(0, Some(5))], &metadata(&["car"]));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["stats"]["car"], 1);
        assert_eq!(json["detections"][0]["id"], "car_5");
        assert_eq!(json["detections"][0]["class"], "car");
        assert_eq!(json["detections"][0]["w"], 100.0);
    }
}
