use serde::{Deserialize, Serialize};

use crate::types::Values;

/// A single record of a collection.
///
/// `id`, `created_at` and `updated_at` are assigned by the backend; this
/// crate never invents them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Opaque, backend-assigned identifier.
    pub id: String,
    pub collection_slug: String,
    pub values: Values,
    /// Millis since epoch.
    pub created_at: i64,
    /// Millis since epoch.
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn serializes_camel_case() {
        let mut values = Values::new();
        values.insert("amount".into(), Value::Int(10));
        let record = Record {
            id: "r1".into(),
            collection_slug: "orders".into(),
            values,
            created_at: 1,
            updated_at: 2,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["collectionSlug"], "orders");
        assert_eq!(json["values"]["amount"], 10);
        assert_eq!(json["updatedAt"], 2);
    }
}
