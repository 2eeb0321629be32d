//! Shared primitives used across ProposalView crates.

use core::fmt;
use serde::Deserialize;
use serde::Serialize;
use serde::de;
use std::collections::BTreeMap;

/// Result alias used across the workspace.
pub type ProposalResult<T> = Result<T, ProposalError>;

/// Top-level error type carried between engine layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalError {
    pub code: &'static str,
    pub message: String,
}

impl ProposalError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProposalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProposalError {}

/// Exact currency amount stored as integer cents.
///
/// Pricing tables carry two-decimal dollar amounts; integer cents keep sums
/// exact under repeated recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Money {
    cents: i64,
}

impl Money {
    pub const ZERO: Money = Money { cents: 0 };

    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars.saturating_mul(100),
        }
    }

    pub fn cents(self) -> i64 {
        self.cents
    }

    pub fn is_positive(self) -> bool {
        self.cents > 0
    }

    pub fn add(self, other: Money) -> Money {
        Money {
            cents: self.cents.saturating_add(other.cents),
        }
    }

    pub fn scale(self, factor: u32) -> Money {
        Money {
            cents: self.cents.saturating_mul(i64::from(factor)),
        }
    }

    /// Parses `3600`, `3,600.5`, `3600.00`, or the same with a leading `$`.
    ///
    /// Returns `None` for negative amounts, more than two decimals, or any
    /// trailing garbage.
    pub fn parse(input: &str) -> Option<Money> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed).trim_start();
        if trimmed.is_empty() {
            return None;
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (trimmed, None),
        };

        let mut dollars = 0_i64;
        let mut saw_digit = false;
        for ch in whole.chars() {
            match ch {
                ',' => continue,
                '0'..='9' => {
                    saw_digit = true;
                    let digit = i64::from(ch as u8 - b'0');
                    dollars = dollars.checked_mul(10)?.checked_add(digit)?;
                }
                _ => return None,
            }
        }
        if !saw_digit {
            return None;
        }

        let fraction_cents = match fraction {
            None => 0,
            Some(fraction) => {
                if fraction.is_empty()
                    || fraction.len() > 2
                    || !fraction.chars().all(|ch| ch.is_ascii_digit())
                {
                    return None;
                }
                let value = fraction.parse::<i64>().ok()?;
                if fraction.len() == 1 { value * 10 } else { value }
            }
        };

        Some(Money {
            cents: dollars.checked_mul(100)?.checked_add(fraction_cents)?,
        })
    }

    /// Machine-readable form without symbol or grouping: `3600.00`.
    pub fn to_plain_string(self) -> String {
        format!("{}.{:02}", self.cents / 100, (self.cents % 100).abs())
    }
}

/// Displays as `$3,600.00` with thousands grouping.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dollars = (self.cents / 100).abs();
        let cents = (self.cents % 100).abs();
        let digits = dollars.to_string();
        let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
        for (index, ch) in digits.chars().enumerate() {
            if index > 0 && (digits.len() - index) % 3 == 0 {
                grouped.push(',');
            }
            grouped.push(ch);
        }
        let sign = if self.cents < 0 { "-" } else { "" };
        write!(f, "{sign}${grouped}.{cents:02}")
    }
}

impl Serialize for Money {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_plain_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MoneyVisitor;

        impl de::Visitor<'_> for MoneyVisitor {
            type Value = Money;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a dollar amount as a number or a decimal string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Money, E> {
                Money::parse(value)
                    .ok_or_else(|| E::custom(format!("unparseable amount `{value}`")))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Money, E> {
                if !value.is_finite() {
                    return Err(E::custom("non-finite amount"));
                }
                Ok(Money::from_cents((value * 100.0).round() as i64))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Money, E> {
                Ok(Money::from_dollars(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Money, E> {
                self.visit_i64(i64::try_from(value).map_err(E::custom)?)
            }
        }

        deserializer.deserialize_any(MoneyVisitor)
    }
}

/// Selection flag with an explicit unknown state.
///
/// External snapshots encode these as `true`, `false`, or `null`/absent;
/// unknown always degrades toward "show the content".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriState {
    Selected,
    NotSelected,
    #[default]
    Unknown,
}

impl TriState {
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => TriState::Selected,
            Some(false) => TriState::NotSelected,
            None => TriState::Unknown,
        }
    }

    pub fn as_flag(self) -> Option<bool> {
        match self {
            TriState::Selected => Some(true),
            TriState::NotSelected => Some(false),
            TriState::Unknown => None,
        }
    }
}

impl Serialize for TriState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_flag() {
            Some(flag) => serializer.serialize_bool(flag),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for TriState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let flag = Option::<bool>::deserialize(deserializer)?;
        Ok(TriState::from_flag(flag))
    }
}

/// Work category owning a family of material sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkCategory {
    Roofing,
    Siding,
    Decking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoofingMaterial {
    Asphalt,
    Davinci,
    Cedar,
    Rubber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SidingMaterial {
    Cedar,
    Synthetic,
    Vinyl,
    Clapboard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExtraKind {
    Windows,
    Skylights,
    Trim,
    Plywood,
    Chimney,
    Gutters,
    Detached,
    Custom,
}

/// Closed enumeration of logical pricing sections within a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKey {
    Roofing(RoofingMaterial),
    Siding(SidingMaterial),
    Decking,
    Extra(ExtraKind),
}

impl SectionKey {
    pub const ALL: [SectionKey; 17] = [
        SectionKey::Roofing(RoofingMaterial::Davinci),
        SectionKey::Roofing(RoofingMaterial::Cedar),
        SectionKey::Roofing(RoofingMaterial::Rubber),
        SectionKey::Roofing(RoofingMaterial::Asphalt),
        SectionKey::Siding(SidingMaterial::Cedar),
        SectionKey::Siding(SidingMaterial::Synthetic),
        SectionKey::Siding(SidingMaterial::Vinyl),
        SectionKey::Siding(SidingMaterial::Clapboard),
        SectionKey::Decking,
        SectionKey::Extra(ExtraKind::Windows),
        SectionKey::Extra(ExtraKind::Skylights),
        SectionKey::Extra(ExtraKind::Trim),
        SectionKey::Extra(ExtraKind::Plywood),
        SectionKey::Extra(ExtraKind::Chimney),
        SectionKey::Extra(ExtraKind::Gutters),
        SectionKey::Extra(ExtraKind::Detached),
        SectionKey::Extra(ExtraKind::Custom),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Roofing(RoofingMaterial::Asphalt) => "roofing.asphalt",
            SectionKey::Roofing(RoofingMaterial::Davinci) => "roofing.davinci",
            SectionKey::Roofing(RoofingMaterial::Cedar) => "roofing.cedar",
            SectionKey::Roofing(RoofingMaterial::Rubber) => "roofing.rubber",
            SectionKey::Siding(SidingMaterial::Cedar) => "siding.cedar",
            SectionKey::Siding(SidingMaterial::Synthetic) => "siding.synthetic",
            SectionKey::Siding(SidingMaterial::Vinyl) => "siding.vinyl",
            SectionKey::Siding(SidingMaterial::Clapboard) => "siding.clapboard",
            SectionKey::Decking => "decking",
            SectionKey::Extra(ExtraKind::Windows) => "extras.windows",
            SectionKey::Extra(ExtraKind::Skylights) => "extras.skylights",
            SectionKey::Extra(ExtraKind::Trim) => "extras.trim",
            SectionKey::Extra(ExtraKind::Plywood) => "extras.plywood",
            SectionKey::Extra(ExtraKind::Chimney) => "extras.chimney",
            SectionKey::Extra(ExtraKind::Gutters) => "extras.gutters",
            SectionKey::Extra(ExtraKind::Detached) => "extras.detached",
            SectionKey::Extra(ExtraKind::Custom) => "extras.custom",
        }
    }

    pub fn from_key_str(input: &str) -> Option<SectionKey> {
        SectionKey::ALL
            .into_iter()
            .find(|key| key.as_str() == input)
    }

    /// Owning work category; extras have none.
    pub fn work_category(self) -> Option<WorkCategory> {
        match self {
            SectionKey::Roofing(_) => Some(WorkCategory::Roofing),
            SectionKey::Siding(_) => Some(WorkCategory::Siding),
            SectionKey::Decking => Some(WorkCategory::Decking),
            SectionKey::Extra(_) => None,
        }
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-work-category selection flags from the pricing snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSelected {
    #[serde(default)]
    pub roofing: TriState,
    #[serde(default)]
    pub siding: TriState,
    #[serde(default)]
    pub decking: TriState,
}

impl WorkSelected {
    pub fn get(&self, category: WorkCategory) -> TriState {
        match category {
            WorkCategory::Roofing => self.roofing,
            WorkCategory::Siding => self.siding,
            WorkCategory::Decking => self.decking,
        }
    }
}

/// Read-only pricing snapshot delivered by the external loader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSnapshot {
    #[serde(default)]
    pub work_selected: WorkSelected,
    /// Per-material tri-state flags keyed by section key string
    /// (`roofing.cedar`, `siding.vinyl`, ...).
    #[serde(default)]
    pub material_selected: BTreeMap<String, TriState>,
    /// Per-extra tri-state flags keyed by section key string
    /// (`extras.skylights`, ...).
    #[serde(default)]
    pub extras_selected: BTreeMap<String, TriState>,
    /// Computed per-category totals from the pricing backend.
    #[serde(default)]
    pub computed_totals: BTreeMap<String, Money>,
    /// Item counts (skylights, windows) used to seed quantity lines.
    #[serde(default)]
    pub counts: BTreeMap<String, u32>,
}

impl SelectionSnapshot {
    pub fn material(&self, key: SectionKey) -> TriState {
        self.material_selected
            .get(key.as_str())
            .copied()
            .unwrap_or_default()
    }

    pub fn extra(&self, key: SectionKey) -> TriState {
        self.extras_selected
            .get(key.as_str())
            .copied()
            .unwrap_or_default()
    }
}

/// One checked pricing line at acceptance time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckedLine {
    pub section: Option<String>,
    pub amount: Money,
}

/// Result emitted to the external accept endpoint when a customer signs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedResult {
    pub signer_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_email: Option<String>,
    /// PNG-encoded signature raster.
    pub signature_png: Vec<u8>,
    pub checked_lines: Vec<CheckedLine>,
    pub final_total: Money,
    pub accepted_snapshot: SelectionSnapshot,
}

#[cfg(test)]
mod tests {
    use super::Money;
    use super::SectionKey;
    use super::SelectionSnapshot;
    use super::TriState;
    use super::WorkCategory;

    #[test]
    fn parses_plain_and_grouped_amounts() {
        assert_eq!(Money::parse("3600"), Some(Money::from_cents(360_000)));
        assert_eq!(Money::parse("3,600.00"), Some(Money::from_cents(360_000)));
        assert_eq!(Money::parse("$3,600.5"), Some(Money::from_cents(360_050)));
        assert_eq!(Money::parse("25.50"), Some(Money::from_cents(2_550)));
    }

    #[test]
    fn rejects_malformed_amounts() {
        assert_eq!(Money::parse(""), None);
        assert_eq!(Money::parse("$"), None);
        assert_eq!(Money::parse("12.345"), None);
        assert_eq!(Money::parse("12abc"), None);
        assert_eq!(Money::parse("-4"), None);
    }

    #[test]
    fn formats_with_grouping_and_symbol() {
        assert_eq!(Money::from_cents(360_000).to_string(), "$3,600.00");
        assert_eq!(Money::from_cents(2_550).to_string(), "$25.50");
        assert_eq!(Money::from_cents(123_456_789).to_string(), "$1,234,567.89");
        assert_eq!(Money::from_cents(360_000).to_plain_string(), "3600.00");
    }

    #[test]
    fn sums_stay_exact_in_cents() {
        let total = Money::parse("140.00")
            .and_then(|a| Money::parse("60.00").map(|b| a.add(b)))
            .and_then(|ab| Money::parse("25.50").map(|c| ab.add(c)));
        assert_eq!(total, Some(Money::from_cents(22_550)));
    }

    #[test]
    fn money_deserializes_from_number_and_string() {
        let from_number: Money = match serde_json::from_str("3600.5") {
            Ok(value) => value,
            Err(_) => unreachable!(),
        };
        let from_string: Money = match serde_json::from_str("\"3,600.50\"") {
            Ok(value) => value,
            Err(_) => unreachable!(),
        };
        assert_eq!(from_number, from_string);
    }

    #[test]
    fn tri_state_decodes_null_as_unknown() {
        #[derive(serde::Deserialize)]
        struct Probe {
            #[serde(default)]
            flag: TriState,
        }

        let explicit: Result<Probe, _> = serde_json::from_str(r#"{"flag": null}"#);
        let missing: Result<Probe, _> = serde_json::from_str(r#"{}"#);
        assert!(matches!(explicit.map(|p| p.flag), Ok(TriState::Unknown)));
        assert!(matches!(missing.map(|p| p.flag), Ok(TriState::Unknown)));
    }

    #[test]
    fn section_keys_round_trip_their_key_strings() {
        for key in SectionKey::ALL {
            assert_eq!(SectionKey::from_key_str(key.as_str()), Some(key));
        }
    }

    #[test]
    fn extras_have_no_owning_work_category() {
        assert_eq!(
            SectionKey::Roofing(super::RoofingMaterial::Cedar).work_category(),
            Some(WorkCategory::Roofing)
        );
        assert_eq!(SectionKey::from_key_str("extras.trim").and_then(SectionKey::work_category), None);
    }

    #[test]
    fn snapshot_defaults_every_flag_to_unknown() {
        let snapshot: SelectionSnapshot = match serde_json::from_str("{}") {
            Ok(value) => value,
            Err(_) => unreachable!(),
        };
        assert_eq!(snapshot.work_selected.roofing, TriState::Unknown);
        assert_eq!(
            snapshot.material(SectionKey::Roofing(super::RoofingMaterial::Cedar)),
            TriState::Unknown
        );
    }
}
