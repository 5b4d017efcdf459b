use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::import_run::SourceType;
use super::source_record::SourceRecord;

/// InvestorContact は Folk から取り込んだ連絡先（投資家・ファーム）。folk_id で一意。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestorContact {
    pub id: Uuid,
    pub folk_id: String,
    pub record_type: SourceType,
    pub name: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// ContactMappingError は Folk レコードを連絡先へ変換できなかった理由。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactMappingError {
    #[error("record {0} has no name")]
    MissingName(String),

    #[error("record {folk_id} has a malformed email: {email}")]
    MalformedEmail { folk_id: String, email: String },
}

impl InvestorContact {
    /// Folk の people / companies レコードから連絡先を組み立てる。
    pub fn from_source(record: &SourceRecord) -> Result<Self, ContactMappingError> {
        let payload = &record.payload;
        let name = match record.record_type {
            SourceType::People => person_name(payload),
            SourceType::Companies => str_field(payload, "name"),
        }
        .ok_or_else(|| ContactMappingError::MissingName(record.folk_id.clone()))?;

        let email = first_email(payload);
        if let Some(ref email) = email {
            if !is_plausible_email(email) {
                return Err(ContactMappingError::MalformedEmail {
                    folk_id: record.folk_id.clone(),
                    email: email.clone(),
                });
            }
        }

        let company = match record.record_type {
            SourceType::People => payload
                .get("companies")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .and_then(|c| str_field(c, "name")),
            SourceType::Companies => None,
        };

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            folk_id: record.folk_id.clone(),
            record_type: record.record_type,
            name,
            email: email.map(|e| e.to_lowercase()),
            company,
            title: str_field(payload, "jobTitle"),
            attributes: payload
                .get("customFieldValues")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: now,
            updated_at: now,
        })
    }

    /// 取り込み対象のフィールドが同一かどうか。id やタイムスタンプは比較しない。
    pub fn same_content(&self, other: &InvestorContact) -> bool {
        self.folk_id == other.folk_id
            && self.record_type == other.record_type
            && self.name == other.name
            && self.email == other.email
            && self.company == other.company
            && self.title == other.title
            && self.attributes == other.attributes
    }
}

fn str_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

fn person_name(payload: &serde_json::Value) -> Option<String> {
    str_field(payload, "fullName").or_else(|| {
        let parts: Vec<String> = ["firstName", "lastName"]
            .iter()
            .filter_map(|k| str_field(payload, k))
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    })
}

fn first_email(payload: &serde_json::Value) -> Option<String> {
    if let Some(email) = str_field(payload, "email") {
        return Some(email);
    }
    payload
        .get("emails")
        .and_then(|e| e.as_array())
        .and_then(|emails| {
            emails.iter().find_map(|e| match e {
                serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                other => str_field(other, "value"),
            })
        })
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(payload: serde_json::Value) -> SourceRecord {
        SourceRecord::new("per_1", SourceType::People, payload)
    }

    #[test]
    fn test_maps_person_fields() {
        let record = person(serde_json::json!({
            "id": "per_1",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "emails": ["Ada@Analytical.io"],
            "jobTitle": "Partner",
            "companies": [{"id": "com_1", "name": "Analytical Ventures"}]
        }));
        let contact = InvestorContact::from_source(&record).unwrap();
        assert_eq!(contact.name, "Ada Lovelace");
        assert_eq!(contact.email.as_deref(), Some("ada@analytical.io"));
        assert_eq!(contact.company.as_deref(), Some("Analytical Ventures"));
        assert_eq!(contact.title.as_deref(), Some("Partner"));
    }

    #[test]
    fn test_maps_company_name() {
        let record = SourceRecord::new(
            "com_1",
            SourceType::Companies,
            serde_json::json!({"id": "com_1", "name": "Seedcamp"}),
        );
        let contact = InvestorContact::from_source(&record).unwrap();
        assert_eq!(contact.name, "Seedcamp");
        assert!(contact.email.is_none());
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let record = person(serde_json::json!({"id": "per_1", "fullName": "  "}));
        assert_eq!(
            InvestorContact::from_source(&record),
            Err(ContactMappingError::MissingName("per_1".to_string()))
        );
    }

    #[test]
    fn test_malformed_email_is_rejected() {
        let record = person(serde_json::json!({"fullName": "Grace", "email": "grace-at-navy"}));
        assert!(matches!(
            InvestorContact::from_source(&record),
            Err(ContactMappingError::MalformedEmail { .. })
        ));
    }

    #[test]
    fn test_same_content_ignores_identity() {
        let record = person(serde_json::json!({"fullName": "Grace Hopper"}));
        let a = InvestorContact::from_source(&record).unwrap();
        let b = InvestorContact::from_source(&record).unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.same_content(&b));
    }
}
