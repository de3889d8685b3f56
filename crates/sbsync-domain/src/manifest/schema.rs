use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::{AppEntry, DeclaredVersion, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    PositiveInteger,
    NonEmptyString,
    String,
    Timestamp,
}

#[derive(Clone, Copy, Debug)]
pub struct FieldSpec {
    pub key: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Field table every manifest element is checked against, in report order.
pub const APP_ENTRY_SCHEMA: &[FieldSpec] = &[
    FieldSpec {
        key: "uid",
        kind: FieldKind::PositiveInteger,
        required: true,
    },
    FieldSpec {
        key: "name",
        kind: FieldKind::NonEmptyString,
        required: true,
    },
    FieldSpec {
        key: "appid",
        kind: FieldKind::String,
        required: true,
    },
    FieldSpec {
        key: "version",
        kind: FieldKind::NonEmptyString,
        required: true,
    },
    FieldSpec {
        key: "updated_time",
        kind: FieldKind::Timestamp,
        required: false,
    },
    FieldSpec {
        key: "resolved_version",
        kind: FieldKind::NonEmptyString,
        required: false,
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    NotAnObject,
    Missing,
    WrongType,
    Empty,
    NotPositive,
    BadTimestamp,
    DuplicateUid,
}

impl ViolationKind {
    fn describe(self) -> &'static str {
        match self {
            Self::NotAnObject => "entry is not a JSON object",
            Self::Missing => "is required",
            Self::WrongType => "has the wrong type",
            Self::Empty => "must not be empty",
            Self::NotPositive => "must be a positive integer",
            Self::BadTimestamp => "must be an RFC 3339 timestamp with offset",
            Self::DuplicateUid => "is shared with another entry",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    pub kind: ViolationKind,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entry #{}", self.index)?;
        if let Some(uid) = self.uid {
            write!(f, " (uid {uid})")?;
        }
        match self.field {
            Some(field) => write!(f, ": {field} {}", self.kind.describe()),
            None => write!(f, ": {}", self.kind.describe()),
        }
    }
}

/// Uid of an element when it is readable as a positive integer, even if the
/// rest of the element is malformed.
pub(super) fn readable_uid(value: &Value) -> Option<u64> {
    value
        .get("uid")
        .and_then(Value::as_u64)
        .filter(|uid| *uid > 0)
}

/// Checks one manifest element against [`APP_ENTRY_SCHEMA`].
pub fn check_entry(index: usize, value: &Value) -> Result<AppEntry, Vec<SchemaViolation>> {
    let uid = readable_uid(value);
    let Some(object) = value.as_object() else {
        return Err(vec![SchemaViolation {
            index,
            uid: None,
            field: None,
            kind: ViolationKind::NotAnObject,
        }]);
    };

    let violations: Vec<SchemaViolation> = APP_ENTRY_SCHEMA
        .iter()
        .filter_map(|spec| {
            let kind = match object.get(spec.key) {
                None | Some(Value::Null) if spec.required => Some(ViolationKind::Missing),
                None | Some(Value::Null) => None,
                Some(field) => check_field(spec.kind, field),
            }?;
            Some(SchemaViolation {
                index,
                uid,
                field: Some(spec.key),
                kind,
            })
        })
        .collect();
    if !violations.is_empty() {
        return Err(violations);
    }

    let text = |key: &str| {
        object
            .get(key)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    };
    let extra: BTreeMap<String, Value> = object
        .iter()
        .filter(|(key, _)| !APP_ENTRY_SCHEMA.iter().any(|spec| spec.key == key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    let updated_time = text("updated_time").and_then(|raw| Timestamp::parse(&raw).ok());

    Ok(AppEntry {
        uid: uid.unwrap_or_default(),
        name: text("name").unwrap_or_default(),
        app_id: text("appid").unwrap_or_default(),
        declared_version: DeclaredVersion::parse(&text("version").unwrap_or_default()),
        updated_time,
        resolved_version: text("resolved_version"),
        extra,
    })
}

fn check_field(kind: FieldKind, value: &Value) -> Option<ViolationKind> {
    match kind {
        FieldKind::PositiveInteger => match value {
            Value::Number(number) if number.as_u64().is_some_and(|n| n > 0) => None,
            Value::Number(number) if number.is_i64() || number.is_u64() => {
                Some(ViolationKind::NotPositive)
            }
            _ => Some(ViolationKind::WrongType),
        },
        FieldKind::NonEmptyString => match value.as_str() {
            Some(text) if text.trim().is_empty() => Some(ViolationKind::Empty),
            Some(_) => None,
            None => Some(ViolationKind::WrongType),
        },
        FieldKind::String => (!value.is_string()).then_some(ViolationKind::WrongType),
        FieldKind::Timestamp => match value.as_str() {
            Some(raw) if Timestamp::parse(raw).is_ok() => None,
            Some(_) => Some(ViolationKind::BadTimestamp),
            None => Some(ViolationKind::WrongType),
        },
    }
}
