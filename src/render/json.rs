use serde::Serialize;

use crate::error::FinderError;

pub fn to_pretty<T: Serialize>(value: &T) -> Result<String, FinderError> {
    Ok(serde_json::to_string_pretty(value)?)
}

#[cfg(test)]
mod tests {
    use super::to_pretty;
    use crate::entities::organization::{Organization, OrganizationType, Source};

    #[test]
    fn organization_serializes_wire_names() {
        let org = Organization::new(
            "ファブリー病患者会",
            "https://fabry.example.jp/",
            OrganizationType::Patient,
            Source::Manual,
        );
        let json = to_pretty(&org).expect("json");
        assert!(json.contains('\n'));
        assert!(json.contains("\"type\": \"patient\""));
        assert!(json.contains("\"source\": \"manual\""));
        assert!(json.contains("\"validation_status\": \"pending\""));
    }
}
