//! vCard-like contact info fields and display aliases built from user info.

use serde_json::json;

use crate::telegram::types::UserInfo;

pub const UNKNOWN_NAME: &str = "Unknown name";

/// One `(field name, parameters, values)` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactInfoField {
    pub name: String,
    pub parameters: Vec<String>,
    pub values: Vec<String>,
}

impl ContactInfoField {
    fn new(name: &str, parameters: &[&str], values: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            parameters: parameters.iter().map(|p| p.to_string()).collect(),
            values,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        json!([self.name, self.parameters, self.values])
    }
}

fn simplified(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn full_name(info: &UserInfo) -> String {
    simplified(&format!("{} {}", info.first_name, info.last_name))
}

pub fn contact_info(info: &UserInfo) -> Vec<ContactInfoField> {
    let mut fields = Vec::new();

    if !info.username.is_empty() {
        fields.push(ContactInfoField::new("nickname", &[], vec![info.username.clone()]));
    }

    if !info.phone.is_empty() {
        let phone = if info.phone.starts_with('+') {
            info.phone.clone()
        } else {
            format!("+{}", info.phone)
        };
        fields.push(ContactInfoField::new("tel", &["type=text", "type=cell"], vec![phone]));
    }

    let name = full_name(info);
    if !name.is_empty() {
        fields.push(ContactInfoField::new("fn", &[], vec![name]));
    }

    // Surname, given, additional, prefix, suffix.
    fields.push(ContactInfoField::new(
        "n",
        &[],
        vec![
            info.last_name.clone(),
            info.first_name.clone(),
            String::new(),
            String::new(),
            String::new(),
        ],
    ));

    fields
}

pub fn alias(info: Option<&UserInfo>) -> String {
    let Some(info) = info else {
        return UNKNOWN_NAME.to_string();
    };
    let name = full_name(info);
    if !name.is_empty() {
        return name;
    }
    if !info.username.is_empty() {
        return info.username.clone();
    }
    UNKNOWN_NAME.to_string()
}
