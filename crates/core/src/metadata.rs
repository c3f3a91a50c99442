//! Operator-supplied descriptive metadata for `bag-info.txt`.
//!
//! Each recognized field may be supplied zero, one or many times. Variants are
//! told apart by an arbitrary suffix (`CONTACT_PHONE`, `CONTACT_PHONE_2`,
//! `CONTACT_PHONE_office`); suffixes only keep variants distinct and ordered.

use std::collections::BTreeMap;

/// Environment prefix used when no other prefix is configured.
pub const DEFAULT_ENV_PREFIX: &str = "BAGIT_";

/// Every field that can appear in `bag-info.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataField {
    BagGroupIdentifier,
    ContactEmail,
    ContactName,
    ContactPhone,
    OrganizationAddress,
    SourceOrganization,
    ExternalDescription,
    ExternalIdentifier,
}

impl MetadataField {
    /// Fields the operator supplies through the environment, in output order.
    pub const OPERATOR_FIELDS: [MetadataField; 6] = [
        MetadataField::BagGroupIdentifier,
        MetadataField::ContactEmail,
        MetadataField::ContactName,
        MetadataField::ContactPhone,
        MetadataField::OrganizationAddress,
        MetadataField::SourceOrganization,
    ];

    /// Name as written in `bag-info.txt`.
    pub fn canonical_name(self) -> &'static str {
        match self {
            MetadataField::BagGroupIdentifier => "Bag-Group-Identifier",
            MetadataField::ContactEmail => "Contact-Email",
            MetadataField::ContactName => "Contact-Name",
            MetadataField::ContactPhone => "Contact-Phone",
            MetadataField::OrganizationAddress => "Organization-Address",
            MetadataField::SourceOrganization => "Source-Organization",
            MetadataField::ExternalDescription => "External-Description",
            MetadataField::ExternalIdentifier => "External-Identifier",
        }
    }

    /// Base name used for raw input, without prefix or suffix.
    pub fn base_name(self) -> &'static str {
        match self {
            MetadataField::BagGroupIdentifier => "BAG_GROUP_IDENTIFIER",
            MetadataField::ContactEmail => "CONTACT_EMAIL",
            MetadataField::ContactName => "CONTACT_NAME",
            MetadataField::ContactPhone => "CONTACT_PHONE",
            MetadataField::OrganizationAddress => "ORGANIZATION_ADDRESS",
            MetadataField::SourceOrganization => "SOURCE_ORGANIZATION",
            MetadataField::ExternalDescription => "EXTERNAL_DESCRIPTION",
            MetadataField::ExternalIdentifier => "EXTERNAL_IDENTIFIER",
        }
    }

    /// Case-insensitive lookup by canonical name.
    pub fn from_canonical_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.canonical_name().eq_ignore_ascii_case(name))
    }

    const ALL: [MetadataField; 8] = [
        MetadataField::BagGroupIdentifier,
        MetadataField::ContactEmail,
        MetadataField::ContactName,
        MetadataField::ContactPhone,
        MetadataField::OrganizationAddress,
        MetadataField::SourceOrganization,
        MetadataField::ExternalDescription,
        MetadataField::ExternalIdentifier,
    ];
}

/// Which fields are recognized and where raw values come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataConfig {
    pub env_prefix: String,
    pub fields: Vec<MetadataField>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig {
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            fields: MetadataField::OPERATOR_FIELDS.to_vec(),
        }
    }
}

/// Raw `(suffix, value)` variants per base field name, in discovery order.
///
/// The unsuffixed variant has the empty suffix. Inserting an existing
/// `(base, suffix)` pair replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFieldValues {
    variants: BTreeMap<String, Vec<(String, String)>>,
}

impl RawFieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        base: impl Into<String>,
        suffix: impl Into<String>,
        value: impl Into<String>,
    ) {
        let suffix = suffix.into();
        let value = value.into();
        let entries = self.variants.entry(base.into()).or_default();
        match entries.iter_mut().find(|(s, _)| *s == suffix) {
            Some(existing) => existing.1 = value,
            None => entries.push((suffix, value)),
        }
    }

    pub fn variants(&self, base: &str) -> &[(String, String)] {
        self.variants.get(base).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `other`'s variants after this set's own.
    pub fn merge(&mut self, other: RawFieldValues) {
        for (base, entries) in other.variants {
            for (suffix, value) in entries {
                self.insert(base.clone(), suffix, value);
            }
        }
    }
}

/// Ordered field → values mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRecord {
    fields: Vec<(MetadataField, Vec<String>)>,
}

impl MetadataRecord {
    pub fn get(&self, field: MetadataField) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, values)| values.as_slice())
    }

    /// Replace a field's values, or append the field if it is new.
    pub fn set(&mut self, field: MetadataField, values: Vec<String>) {
        match self.fields.iter_mut().find(|(f, _)| *f == field) {
            Some(existing) => existing.1 = values,
            None => self.fields.push((field, values)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetadataField, &[String])> {
        self.fields.iter().map(|(f, v)| (*f, v.as_slice()))
    }

    /// Recognized fields that were not supplied at all.
    pub fn unset_fields(&self) -> Vec<MetadataField> {
        self.fields
            .iter()
            .filter(|(_, values)| values.len() == 1 && values[0].is_empty())
            .map(|(f, _)| *f)
            .collect()
    }
}

/// Gather every recognized field's variants into a record.
///
/// Fields come out in `config.fields` order; values keep discovery order. A
/// field with no variants gets a single empty value. Base names that are not
/// recognized are ignored.
pub fn collect(config: &MetadataConfig, raw: &RawFieldValues) -> MetadataRecord {
    let mut record = MetadataRecord::default();
    for &field in &config.fields {
        let mut values: Vec<String> = raw
            .variants(field.base_name())
            .iter()
            .map(|(_, value)| value.clone())
            .collect();
        if values.is_empty() {
            values.push(String::new());
        }
        record.set(field, values);
    }
    record
}

/// Split prefixed environment-style variables into raw field variants.
///
/// Keys are visited in sorted order, so the unsuffixed form of a field is
/// discovered before its suffixed forms. A key is attributed to the longest
/// recognized base name it starts with; whatever follows (minus one leading
/// `_`) is the suffix.
pub fn split_env_vars<I>(config: &MetadataConfig, vars: I) -> RawFieldValues
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut sorted: Vec<(String, String)> = vars
        .into_iter()
        .filter(|(key, _)| key.starts_with(&config.env_prefix))
        .collect();
    sorted.sort();

    let mut raw = RawFieldValues::new();
    for (key, value) in sorted {
        let rest = &key[config.env_prefix.len()..];
        let matched = config
            .fields
            .iter()
            .map(|f| f.base_name())
            .filter(|base| rest.starts_with(base))
            .max_by_key(|base| base.len());
        if let Some(base) = matched {
            let suffix = &rest[base.len()..];
            let suffix = suffix.strip_prefix('_').unwrap_or(suffix);
            raw.insert(base, suffix, value);
        }
    }
    raw
}
