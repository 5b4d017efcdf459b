use serde::{Deserialize, Serialize};

use super::import_run::{ImportRunError, SourceType};

/// SourceRecord は Folk から取得した 1 レコードのスナップショット。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub folk_id: String,
    pub record_type: SourceType,
    pub payload: serde_json::Value,
}

impl SourceRecord {
    pub fn new(folk_id: impl Into<String>, record_type: SourceType, payload: serde_json::Value) -> Self {
        Self {
            folk_id: folk_id.into(),
            record_type,
            payload,
        }
    }
}

/// RecordRange はグループ内のどのレコードを処理するかの指定。
/// first / last / start..=end（1 始まり）のいずれか 1 つ、または指定なし（全件）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl RecordRange {
    pub fn validate(&self) -> Result<(), ImportRunError> {
        let has_window = self.start.is_some() || self.end.is_some();
        let selectors = [self.first.is_some(), self.last.is_some(), has_window]
            .into_iter()
            .filter(|set| *set)
            .count();
        if selectors > 1 {
            return Err(ImportRunError::InvalidInput(
                "only one of first, last or start/end may be given".to_string(),
            ));
        }

        if let Some(first) = self.first {
            if first < 1 {
                return Err(ImportRunError::InvalidInput(format!(
                    "first must be at least 1: {first}"
                )));
            }
        }
        if let Some(last) = self.last {
            if last < 1 {
                return Err(ImportRunError::InvalidInput(format!(
                    "last must be at least 1: {last}"
                )));
            }
        }
        if has_window {
            let (Some(start), Some(end)) = (self.start, self.end) else {
                return Err(ImportRunError::InvalidInput(
                    "start and end must be given together".to_string(),
                ));
            };
            if start < 1 {
                return Err(ImportRunError::InvalidInput(format!(
                    "start must be at least 1: {start}"
                )));
            }
            if end < start {
                return Err(ImportRunError::InvalidInput(format!(
                    "end ({end}) must not be before start ({start})"
                )));
            }
        }
        Ok(())
    }

    /// 取得前に分かる処理件数の上限。範囲指定がなければ None。
    pub fn expected_len(&self) -> Option<i64> {
        match (self.first, self.last, self.start, self.end) {
            (Some(n), _, _, _) | (_, Some(n), _, _) => Some(n),
            (_, _, Some(start), Some(end)) => Some(end - start + 1),
            _ => None,
        }
    }

    /// 取得済みのレコード列に範囲を適用する。範囲が件数を超える場合は存在する分だけ返す。
    pub fn apply<T>(&self, records: Vec<T>) -> Vec<T> {
        let len = records.len();
        let (skip, take) = if let Some(first) = self.first {
            (0, to_usize(first))
        } else if let Some(last) = self.last {
            let take = to_usize(last).min(len);
            (len - take, take)
        } else if let (Some(start), Some(end)) = (self.start, self.end) {
            let skip = to_usize(start - 1);
            (skip, to_usize(end - start + 1))
        } else {
            (0, len)
        };
        records.into_iter().skip(skip).take(take).collect()
    }
}

fn to_usize(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<usize> {
        (1..=n).collect()
    }

    #[test]
    fn test_unbounded_range_keeps_everything() {
        let range = RecordRange::default();
        assert!(range.validate().is_ok());
        assert_eq!(range.expected_len(), None);
        assert_eq!(range.apply(ids(4)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_first_and_last() {
        let first = RecordRange {
            first: Some(2),
            ..Default::default()
        };
        assert_eq!(first.apply(ids(5)), vec![1, 2]);
        assert_eq!(first.expected_len(), Some(2));

        let last = RecordRange {
            last: Some(2),
            ..Default::default()
        };
        assert_eq!(last.apply(ids(5)), vec![4, 5]);
        assert_eq!(last.apply(ids(1)), vec![1]);
    }

    #[test]
    fn test_start_end_is_one_based_inclusive() {
        let range = RecordRange {
            start: Some(2),
            end: Some(4),
            ..Default::default()
        };
        assert!(range.validate().is_ok());
        assert_eq!(range.expected_len(), Some(3));
        assert_eq!(range.apply(ids(5)), vec![2, 3, 4]);
        assert_eq!(range.apply(ids(3)), vec![2, 3]);
        assert!(range.apply(ids(1)).is_empty());
    }

    #[test]
    fn test_validate_rejects_combined_selectors() {
        let range = RecordRange {
            first: Some(1),
            last: Some(1),
            ..Default::default()
        };
        assert!(range.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        for range in [
            RecordRange {
                first: Some(0),
                ..Default::default()
            },
            RecordRange {
                last: Some(-3),
                ..Default::default()
            },
            RecordRange {
                start: Some(0),
                end: Some(2),
                ..Default::default()
            },
            RecordRange {
                start: Some(5),
                end: Some(4),
                ..Default::default()
            },
            RecordRange {
                start: Some(1),
                ..Default::default()
            },
        ] {
            assert!(range.validate().is_err(), "{range:?} should be rejected");
        }
    }
}
