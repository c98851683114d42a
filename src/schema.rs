//! Field-interpretation table and structured records.
//!
//! Records carry a dynamic set of fields. Rather than free-form attribute
//! access, each record keeps two explicit maps: `fields` for names listed in
//! the [`FieldTable`] and `extra` for anything the model returned outside it.
//! The table doubles as prompt material (label + meaning per field), as
//! display metadata for downstream consumers and as the rule set
//! [`FieldTable::validate`] checks stored records against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a field's values are normalised by the cleaner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Free text, trimmed only.
    Text,
    /// Numeric-looking values are reduced to canonical digits.
    Integer,
    /// Localised enumeration values are mapped to canonical tokens.
    Enumerated,
}

/// One row of the interpretation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Canonical field name used in records.
    pub name: String,
    /// Label as it appears in source documents.
    pub local_label: String,
    /// Meaning of the field, embedded in extraction prompts.
    pub description: String,
    pub kind: FieldKind,
    /// Canonical values an enumerated field may take. Empty means any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
}

impl FieldSpec {
    pub fn new(
        name: impl Into<String>,
        local_label: impl Into<String>,
        description: impl Into<String>,
        kind: FieldKind,
    ) -> Self {
        Self {
            name: name.into(),
            local_label: local_label.into(),
            description: description.into(),
            kind,
            allowed_values: Vec::new(),
        }
    }

    pub fn with_allowed<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }
}

/// A table deserialised from an empty list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("field table needs at least one field, the business key")]
pub struct EmptyFieldTable;

/// One way a record breaks its [`FieldTable`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("business key is empty")]
    EmptyKey,
    #[error("{field}: '{value}' is not a whole number")]
    NotAnInteger { field: String, value: String },
    #[error("{field}: '{value}' is not one of {allowed:?}")]
    NotAllowed {
        field: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("{field}: not in the field table")]
    UnknownField { field: String },
}

/// Ordered interpretation table. The first entry is the unique business key.
///
/// Serialises as a plain list of [`FieldSpec`]; an empty list is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldTable {
    specs: Vec<FieldSpec>,
}

impl FieldTable {
    /// Build a table; `key` must be the first spec.
    pub fn new(specs: Vec<FieldSpec>) -> Option<Self> {
        if specs.is_empty() {
            None
        } else {
            Some(Self { specs })
        }
    }

    pub fn key(&self) -> &FieldSpec {
        &self.specs[0]
    }

    pub fn specs(&self) -> &[FieldSpec] {
        &self.specs
    }

    /// Non-key fields.
    pub fn attributes(&self) -> &[FieldSpec] {
        &self.specs[1..]
    }

    /// Look up a spec by canonical name or local label (case-insensitive).
    pub fn lookup(&self, raw_name: &str) -> Option<&FieldSpec> {
        let needle = raw_name.trim().to_lowercase();
        self.specs
            .iter()
            .find(|s| s.name.to_lowercase() == needle || s.local_label.to_lowercase() == needle)
    }

    /// Every way `record` breaks this table; empty when it is valid.
    ///
    /// Integer fields must hold canonical digits (or `unlimited`), enumerated
    /// fields with allowed values must hold one of them, and every field the
    /// model returned outside the table is reported once.
    pub fn validate(&self, record: &StructuredRecord) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if record.name.trim().is_empty() {
            issues.push(ValidationIssue::EmptyKey);
        }

        for (field, value) in &record.fields {
            let Some(spec) = self.lookup(field) else {
                issues.push(ValidationIssue::UnknownField {
                    field: field.clone(),
                });
                continue;
            };
            match spec.kind {
                FieldKind::Integer => {
                    let digits = !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit());
                    if !digits && value != "unlimited" {
                        issues.push(ValidationIssue::NotAnInteger {
                            field: field.clone(),
                            value: value.clone(),
                        });
                    }
                }
                FieldKind::Enumerated if !spec.allowed_values.is_empty() => {
                    if !spec.allowed_values.iter().any(|a| a == value) {
                        issues.push(ValidationIssue::NotAllowed {
                            field: field.clone(),
                            value: value.clone(),
                            allowed: spec.allowed_values.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        issues.extend(record.extra.keys().map(|field| ValidationIssue::UnknownField {
            field: field.clone(),
        }));
        issues
    }

    /// Vietnamese telecom-package table.
    pub fn telecom_packages() -> Self {
        use FieldKind::*;
        let specs = vec![
            FieldSpec::new(
                "name",
                "Mã dịch vụ",
                "Mã định danh duy nhất của gói cước (ví dụ: SD70, VIP, STANDARD)",
                Text,
            ),
            FieldSpec::new("carrier", "Nhà mạng", "Tên nhà mạng cung cấp gói cước", Text),
            FieldSpec::new(
                "payment_type",
                "Thời gian thanh toán",
                "Hình thức thanh toán: 'Trả trước' hoặc 'Trả sau'",
                Enumerated,
            )
            .with_allowed(["prepaid", "postpaid"]),
            FieldSpec::new(
                "prerequisites",
                "Các dịch vụ tiên quyết",
                "Các dịch vụ cần có trước khi đăng ký gói",
                Text,
            ),
            FieldSpec::new(
                "price",
                "Giá (VNĐ)",
                "Giá của gói cước trong một chu kỳ, tính theo đồng Việt Nam",
                Integer,
            ),
            FieldSpec::new(
                "cycle_days",
                "Chu kỳ (ngày)",
                "Thời gian hiệu lực của gói cước tính theo ngày",
                Integer,
            ),
            FieldSpec::new(
                "data_standard_daily",
                "4G tốc độ tiêu chuẩn/ngày",
                "Dung lượng 4G tốc độ tiêu chuẩn mỗi ngày (GB)",
                Enumerated,
            ),
            FieldSpec::new(
                "data_high_daily",
                "4G tốc độ cao/ngày",
                "Dung lượng 4G tốc độ cao mỗi ngày (GB)",
                Enumerated,
            ),
            FieldSpec::new(
                "data_standard_cycle",
                "4G tốc độ tiêu chuẩn/chu kỳ",
                "Dung lượng 4G tốc độ tiêu chuẩn cho cả chu kỳ (GB)",
                Enumerated,
            ),
            FieldSpec::new(
                "data_high_cycle",
                "4G tốc độ cao/chu kỳ",
                "Dung lượng 4G tốc độ cao cho cả chu kỳ (GB)",
                Enumerated,
            ),
            FieldSpec::new(
                "calls_on_net",
                "Gọi nội mạng",
                "Chi tiết ưu đãi gọi nội mạng trong chu kỳ",
                Enumerated,
            ),
            FieldSpec::new(
                "calls_off_net",
                "Gọi ngoại mạng",
                "Chi tiết ưu đãi gọi ngoại mạng trong chu kỳ",
                Enumerated,
            ),
            FieldSpec::new("sms", "Tin nhắn", "Chi tiết ưu đãi tin nhắn trong chu kỳ", Enumerated),
            FieldSpec::new(
                "details",
                "Chi tiết",
                "Mô tả thêm về gói cước: ưu đãi, điều kiện sử dụng, giới hạn",
                Text,
            ),
            FieldSpec::new(
                "auto_renew",
                "Tự động gia hạn",
                "Gói cước có tự động gia hạn hay không: 'Có' hoặc 'Không'",
                Enumerated,
            )
            .with_allowed(["yes", "no"]),
            FieldSpec::new(
                "registration_syntax",
                "Cú pháp đăng ký",
                "Cú pháp SMS hoặc thao tác để đăng ký gói cước",
                Text,
            ),
        ];
        Self { specs }
    }
}

impl TryFrom<Vec<FieldSpec>> for FieldTable {
    type Error = EmptyFieldTable;

    fn try_from(specs: Vec<FieldSpec>) -> Result<Self, Self::Error> {
        Self::new(specs).ok_or(EmptyFieldTable)
    }
}

impl From<FieldTable> for Vec<FieldSpec> {
    fn from(table: FieldTable) -> Self {
        table.specs
    }
}

impl Default for FieldTable {
    fn default() -> Self {
        Self::telecom_packages()
    }
}

/// A cleaned, schema-validated record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredRecord {
    /// Unique business key.
    pub name: String,
    /// Values for fields listed in the interpretation table.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Values for fields outside the table, flagged for review.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StructuredRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    pub fn has_unknown_fields(&self) -> bool {
        !self.extra.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .get(field)
            .or_else(|| self.extra.get(field))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telecom_table_key_is_name() {
        let table = FieldTable::telecom_packages();
        assert_eq!(table.key().name, "name");
        assert_eq!(table.key().local_label, "Mã dịch vụ");
        assert_eq!(table.attributes().len(), table.specs().len() - 1);
    }

    #[test]
    fn lookup_by_name_or_label() {
        let table = FieldTable::telecom_packages();
        assert_eq!(table.lookup("price").map(|s| s.name.as_str()), Some("price"));
        assert_eq!(table.lookup("Giá (VNĐ)").map(|s| s.name.as_str()), Some("price"));
        assert_eq!(table.lookup("  GIÁ (VNĐ) ").map(|s| s.name.as_str()), Some("price"));
        assert!(table.lookup("colour").is_none());
    }

    #[test]
    fn empty_table_rejected() {
        assert!(FieldTable::new(Vec::new()).is_none());
    }

    #[test]
    fn empty_table_rejected_when_deserialised() {
        let err = serde_json::from_str::<FieldTable>("[]").unwrap_err();
        assert!(err.to_string().contains("at least one field"), "{err}");
    }

    #[test]
    fn table_serialises_as_list() {
        let table = FieldTable::new(vec![
            FieldSpec::new("name", "Mã", "key", FieldKind::Text),
            FieldSpec::new("renew", "Gia hạn", "auto", FieldKind::Enumerated).with_allowed(["yes", "no"]),
        ])
        .unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["allowed_values"], serde_json::json!(["yes", "no"]));
        assert!(json[0].get("allowed_values").is_none());
        assert_eq!(serde_json::from_value::<FieldTable>(json).unwrap(), table);
    }

    #[test]
    fn valid_record_has_no_issues() {
        let table = FieldTable::telecom_packages();
        let mut r = StructuredRecord::new("SD70");
        r.fields.insert("price".into(), "70000".into());
        r.fields.insert("payment_type".into(), "prepaid".into());
        r.fields.insert("data_high_daily".into(), "unlimited".into());
        r.fields.insert("details".into(), "Miễn phí tháng đầu".into());
        assert!(table.validate(&r).is_empty());
    }

    #[test]
    fn validation_reports_every_issue() {
        let table = FieldTable::telecom_packages();
        let mut r = StructuredRecord::new("  ");
        r.fields.insert("price".into(), "bảy mươi nghìn".into());
        r.fields.insert("auto_renew".into(), "maybe".into());
        r.extra.insert("bonus".into(), "1".into());

        let issues = table.validate(&r);
        assert_eq!(issues.len(), 4);
        assert!(issues.contains(&ValidationIssue::EmptyKey));
        assert!(issues.contains(&ValidationIssue::NotAnInteger {
            field: "price".into(),
            value: "bảy mươi nghìn".into(),
        }));
        assert!(issues.contains(&ValidationIssue::NotAllowed {
            field: "auto_renew".into(),
            value: "maybe".into(),
            allowed: vec!["yes".into(), "no".into()],
        }));
        assert!(issues.contains(&ValidationIssue::UnknownField { field: "bonus".into() }));
    }

    #[test]
    fn record_get_falls_back_to_extra() {
        let mut r = StructuredRecord::new("SD70");
        r.fields.insert("price".into(), "70000".into());
        r.extra.insert("bonus".into(), "1".into());
        assert_eq!(r.get("price"), Some("70000"));
        assert_eq!(r.get("bonus"), Some("1"));
        assert!(r.has_unknown_fields());
    }
}
