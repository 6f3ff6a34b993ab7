//! Whitelist rules and their columnar Base64 wire form.
//!
//! The wire form is the Base64 encoding of five text lines. Line `i` holds
//! the comma-joined values of tuple field `i` across all rules, so column
//! `j` of every line together forms rule `j`. An empty line, an empty value
//! or the literal `0` is a wildcard.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::WhitelistError;

/// Number of tuple fields in a rule.
pub const FIELD_COUNT: usize = 5;

const WILDCARD: &str = "0";

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "enclave measurement",
    "signer measurement",
    "product id",
    "security version",
    "platform instance id",
];

/// A field value the wire form can carry: non-empty, not the wildcard, no
/// surrounding whitespace, and free of commas and line breaks.
///
/// Built only through [`RuleField::exact`] or by decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExactValue(String);

impl ExactValue {
    /// The value as text.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl AsRef<str> for ExactValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tuple field: either unconstrained or a single exact value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum RuleField {
    /// Matches any value.
    #[default]
    Any,
    /// Matches this value only.
    Exact(ExactValue),
}

impl RuleField {
    /// Builds an exact field. Values that the wire form cannot carry
    /// (empty, `0`, padded with whitespace, or containing a comma or line
    /// break) are rejected.
    pub fn exact(raw: impl Into<String>) -> Result<Self, WhitelistError> {
        let value = raw.into();
        if value.is_empty()
            || value == WILDCARD
            || value.contains([',', '\n', '\r'])
            || value.trim() != value
        {
            return Err(WhitelistError::UnrepresentableValue { value });
        }
        Ok(Self::Exact(ExactValue(value)))
    }

    /// The exact value, or `None` for a wildcard.
    #[must_use]
    pub const fn value(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Exact(value) => Some(value.as_str()),
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim() {
            "" | WILDCARD => Self::Any,
            value => Self::Exact(ExactValue(value.to_owned())),
        }
    }

    const fn wire_value(&self) -> &str {
        match self {
            Self::Any => WILDCARD,
            Self::Exact(value) => value.as_str(),
        }
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value().unwrap_or("*"))
    }
}

/// A five-field attestation identity constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct WhitelistRule {
    /// Enclave measurement (`MRENCLAVE`).
    pub mr_enclave: RuleField,
    /// Signer measurement (`MRSIGNER`).
    pub mr_signer: RuleField,
    /// Product id.
    pub isv_prod_id: RuleField,
    /// Security version number.
    pub isv_svn: RuleField,
    /// Platform instance id.
    pub platform_instance_id: RuleField,
}

impl WhitelistRule {
    fn from_fields(fields: [RuleField; FIELD_COUNT]) -> Self {
        let [mr_enclave, mr_signer, isv_prod_id, isv_svn, platform_instance_id] = fields;
        Self {
            mr_enclave,
            mr_signer,
            isv_prod_id,
            isv_svn,
            platform_instance_id,
        }
    }

    const fn fields(&self) -> [&RuleField; FIELD_COUNT] {
        [
            &self.mr_enclave,
            &self.mr_signer,
            &self.isv_prod_id,
            &self.isv_svn,
            &self.platform_instance_id,
        ]
    }
}

impl fmt::Display for WhitelistRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [enclave, signer, product, svn, platform] = self.fields();
        write!(f, "({enclave}, {signer}, {product}, {svn}, {platform})")
    }
}

/// An ordered, duplicate-free list of rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Whitelist {
    rules: Vec<WhitelistRule>,
}

impl Whitelist {
    /// Builds a whitelist, dropping duplicates after their first occurrence.
    #[must_use]
    pub fn from_rules(rules: impl IntoIterator<Item = WhitelistRule>) -> Self {
        let mut whitelist = Self::default();
        for rule in rules {
            whitelist.push(rule);
        }
        whitelist
    }

    /// Appends `rule` unless an identical rule is already present. Returns
    /// whether it was added.
    pub fn push(&mut self, rule: WhitelistRule) -> bool {
        if self.rules.contains(&rule) {
            return false;
        }
        self.rules.push(rule);
        true
    }

    /// Rules in first-occurrence order.
    #[must_use]
    pub fn rules(&self) -> &[WhitelistRule] {
        &self.rules
    }

    /// Number of rules.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when there are no rules.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Merges `additional` into a copy of `self`.
    ///
    /// `self` is the base: its rules keep their positions and are never
    /// removed. Rules from `additional` that are not already present are
    /// appended in their own order.
    #[must_use]
    pub fn merge(&self, additional: &Self) -> Self {
        let mut merged = self.clone();
        for rule in &additional.rules {
            merged.push(rule.clone());
        }
        merged
    }

    /// Decodes the Base64 columnar form. Whitespace inside the Base64 text
    /// is ignored.
    pub fn decode(encoded: &str) -> Result<Self, WhitelistError> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|source| WhitelistError::Base64 { source })?;
        let text = String::from_utf8(bytes).map_err(|source| WhitelistError::Utf8 { source })?;
        Self::decode_csv(&text)
    }

    fn decode_csv(text: &str) -> Result<Self, WhitelistError> {
        let lines: Vec<&str> = text.lines().collect();
        let extra = lines.iter().skip(FIELD_COUNT).find(|line| !line.trim().is_empty());
        if extra.is_some() {
            return Err(WhitelistError::TooManyFields {
                found: lines.len(),
            });
        }

        let mut columns: [Vec<RuleField>; FIELD_COUNT] = Default::default();
        for (column, line) in columns.iter_mut().zip(&lines) {
            if line.trim().is_empty() {
                continue;
            }
            *column = line.split(',').map(RuleField::parse).collect();
        }

        let rule_count = columns.iter().map(Vec::len).max().unwrap_or_default();
        for (column, name) in columns.iter().zip(FIELD_NAMES) {
            if !column.is_empty() && column.len() != rule_count {
                return Err(WhitelistError::RaggedField {
                    field: name,
                    expected: rule_count,
                    found: column.len(),
                });
            }
        }

        let mut iters = columns.map(Vec::into_iter);
        let rules = (0..rule_count).map(|_| {
            WhitelistRule::from_fields(
                iters
                    .each_mut()
                    .map(|column| column.next().unwrap_or_default()),
            )
        });
        Ok(Self::from_rules(rules))
    }

    /// Encodes the whitelist in its Base64 columnar form. Wildcards are
    /// written as `0`; an empty whitelist encodes to an empty string.
    #[must_use]
    pub fn encode(&self) -> String {
        if self.rules.is_empty() {
            return String::new();
        }
        let mut lines: [Vec<&str>; FIELD_COUNT] = Default::default();
        for rule in &self.rules {
            for (line, field) in lines.iter_mut().zip(rule.fields()) {
                line.push(field.wire_value());
            }
        }
        let csv = lines.map(|values| values.join(",")).join("\n");
        STANDARD.encode(csv)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn exact(value: &str) -> RuleField {
        RuleField::exact(value).expect("valid field")
    }

    fn rule(enclave: &str, signer: &str) -> WhitelistRule {
        WhitelistRule {
            mr_enclave: exact(enclave),
            mr_signer: exact(signer),
            ..WhitelistRule::default()
        }
    }

    fn encoded(csv: &str) -> String {
        STANDARD.encode(csv)
    }

    #[test]
    fn decodes_columns_as_rules() {
        let whitelist = Whitelist::decode(&encoded("aa,bb\ncc,0\n\n,7\n0,0"))
            .expect("whitelist should decode");
        assert_eq!(whitelist.len(), 2);
        let [first, second] = whitelist.rules() else {
            panic!("expected two rules");
        };
        assert_eq!(first.mr_enclave, exact("aa"));
        assert_eq!(first.mr_signer, exact("cc"));
        assert_eq!(first.isv_prod_id, RuleField::Any);
        assert_eq!(first.isv_svn, RuleField::Any);
        assert_eq!(second.mr_signer, RuleField::Any);
        assert_eq!(second.isv_svn, exact("7"));
        assert_eq!(second.platform_instance_id, RuleField::Any);
    }

    #[test]
    fn decode_removes_duplicates_keeping_first() {
        let whitelist =
            Whitelist::decode(&encoded("aa,bb,aa\ncc,dd,cc\n0,0,0\n0,0,0\n0,0,0"))
                .expect("whitelist should decode");
        assert_eq!(whitelist.rules(), &[rule("aa", "cc"), rule("bb", "dd")]);
    }

    #[test]
    fn encode_writes_wildcards_as_zero() {
        let whitelist = Whitelist::from_rules([rule("aa", "cc")]);
        let csv = STANDARD
            .decode(whitelist.encode())
            .map(String::from_utf8)
            .expect("base64")
            .expect("utf-8");
        assert_eq!(csv, "aa\ncc\n0\n0\n0");
    }

    #[test]
    fn empty_whitelist_encodes_to_empty_text() {
        assert_eq!(Whitelist::default().encode(), "");
        assert!(Whitelist::decode("").expect("empty decodes").is_empty());
    }

    #[rstest]
    #[case::ragged("aa,bb\ncc\n0\n0\n0")]
    #[case::six_fields("aa\ncc\n0\n0\n0\n1")]
    fn rejects_malformed_tables(#[case] csv: &str) {
        assert!(Whitelist::decode(&encoded(csv)).is_err());
    }

    #[test]
    fn rejects_invalid_base64() {
        let error = Whitelist::decode("not base64!").expect_err("must fail");
        assert!(matches!(error, WhitelistError::Base64 { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("0")]
    #[case("a,b")]
    #[case(" padded")]
    fn exact_rejects_unrepresentable_values(#[case] value: &str) {
        assert!(RuleField::exact(value).is_err());
    }

    #[test]
    fn decoded_fields_hold_only_wire_safe_values() {
        let whitelist = Whitelist::decode(&encoded(" aa ,bb\ncc,0\n0,0\n0,0\n0,0"))
            .expect("whitelist should decode");
        let [first, _] = whitelist.rules() else {
            panic!("expected two rules");
        };
        assert_eq!(first.mr_enclave.value(), Some("aa"));
        assert_eq!(first.isv_prod_id.value(), None);
        let reencoded = Whitelist::decode(&whitelist.encode()).expect("round trip");
        assert_eq!(reencoded, whitelist);
    }

    #[test]
    fn merge_keeps_local_base_and_appends_new_remote_rules() {
        let a = rule("aa", "cc");
        let b = rule("bb", "dd");
        let local = Whitelist::from_rules([a.clone()]);
        let remote = Whitelist::from_rules([a.clone(), b.clone()]);
        assert_eq!(local.merge(&remote).rules(), &[a.clone(), b.clone()]);
        assert_eq!(remote.merge(&local).rules(), &[a, b]);
    }

    #[test]
    fn merging_with_itself_is_identity() {
        let whitelist = Whitelist::from_rules([rule("aa", "cc"), rule("bb", "dd")]);
        assert_eq!(whitelist.merge(&whitelist), whitelist);
    }
}
