use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tensor names the result writer emits on its own.
pub const RESERVED_OUTPUT_NAMES: &[&str] = &["softmax", "prediction", "label"];

/// Ordered data keys, resolved once at configuration time.
///
/// Key 0 is the primary data key (coordinates + feature). The remaining keys are per-voxel
/// scalar fields stored alongside; key 1 carries the label role and key 2 the weight role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct DataSchema {
    keys: Vec<String>,
}

impl DataSchema {
    pub fn new<I, S>(keys: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        if keys.is_empty() {
            return Err(ConfigError::EmptyDataKeys);
        }
        for (i, key) in keys.iter().enumerate() {
            if key.trim().is_empty() {
                return Err(ConfigError::EmptyDataKey);
            }
            if keys[..i].contains(key) {
                return Err(ConfigError::DuplicateDataKey(key.clone()));
            }
        }
        // Only the primary key is written under its own name; field keys never reach the output.
        if RESERVED_OUTPUT_NAMES.contains(&keys[0].as_str()) {
            return Err(ConfigError::ReservedDataKey(keys[0].clone()));
        }
        Ok(Self { keys })
    }

    /// Parses a comma-separated key list such as `wire,label,weight`.
    pub fn parse(list: &str) -> Result<Self, ConfigError> {
        Self::new(
            list.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string),
        )
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn primary(&self) -> &str {
        &self.keys[0]
    }

    /// Keys after the primary one; `Sample::fields` is aligned with this slice.
    pub fn field_keys(&self) -> &[String] {
        &self.keys[1..]
    }

    pub fn num_fields(&self) -> usize {
        self.keys.len() - 1
    }

    pub fn field_index(&self, key: &str) -> Option<usize> {
        self.field_keys().iter().position(|k| k == key)
    }

    pub fn label_field(&self) -> Option<usize> {
        (self.keys.len() > 1).then_some(0)
    }

    pub fn weight_field(&self) -> Option<usize> {
        (self.keys.len() > 2).then_some(1)
    }
}

impl TryFrom<Vec<String>> for DataSchema {
    type Error = ConfigError;

    fn try_from(keys: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(keys)
    }
}

impl From<DataSchema> for Vec<String> {
    fn from(schema: DataSchema) -> Self {
        schema.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_follow_key_order() {
        let schema = DataSchema::parse("wire, label ,weight,aux").unwrap();
        assert_eq!(schema.primary(), "wire");
        assert_eq!(schema.field_keys(), ["label", "weight", "aux"].map(String::from));
        assert_eq!(schema.label_field(), Some(0));
        assert_eq!(schema.weight_field(), Some(1));
        assert_eq!(schema.field_index("aux"), Some(2));

        let only_data = DataSchema::parse("wire").unwrap();
        assert_eq!(only_data.num_fields(), 0);
        assert_eq!(only_data.label_field(), None);
        assert_eq!(only_data.weight_field(), None);
    }

    #[test]
    fn rejects_bad_key_lists() {
        assert_eq!(DataSchema::parse(""), Err(ConfigError::EmptyDataKeys));
        assert_eq!(
            DataSchema::parse("wire,wire"),
            Err(ConfigError::DuplicateDataKey("wire".into()))
        );
        assert_eq!(
            DataSchema::parse("softmax,wire"),
            Err(ConfigError::ReservedDataKey("softmax".into()))
        );
        assert_eq!(
            DataSchema::new(vec!["wire", " "]),
            Err(ConfigError::EmptyDataKey)
        );
    }

    #[test]
    fn field_keys_may_share_output_names() {
        let schema = DataSchema::parse("data,label").unwrap();
        assert_eq!(schema.primary(), "data");
        assert_eq!(schema.label_field(), Some(0));
        assert!(DataSchema::parse("wire,softmax,prediction").is_ok());
        assert_eq!(
            DataSchema::parse("label,wire"),
            Err(ConfigError::ReservedDataKey("label".into()))
        );
    }

    #[test]
    fn deserialization_validates() {
        let ok: DataSchema = serde_json::from_str(r#"["wire","label"]"#).unwrap();
        assert_eq!(ok.primary(), "wire");
        assert!(serde_json::from_str::<DataSchema>("[]").is_err());
    }
}
