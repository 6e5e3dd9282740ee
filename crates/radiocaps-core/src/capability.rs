//! # Radio Capability Model
//!
//! Value types exchanged with the modem when negotiating which logical
//! modem owns which radio access technologies.
//!
//! ```text
//!   RadioCapability
//!   ├── session_id        correlation id chosen by the manager
//!   ├── phase             CONFIGURED | START | APPLY | UNSOL_RSP | FINISH
//!   ├── rat               radio access family bitmask (Android RAF layout)
//!   ├── logical_modem_id  radio resource the capability binds to
//!   └── status            NONE | SUCCESS | FAIL
//! ```

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─── Radio Access Family ────────────────────────────────────────────────────

/// Set of radio access technologies a modem may use.
///
/// Bit layout follows the RIL radio access family (RAF) definition so the
/// value can be passed to the modem unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RatMask(u32);

impl RatMask {
    pub const EMPTY: RatMask = RatMask(0);
    pub const UNKNOWN: RatMask = RatMask(1 << 0);
    pub const GPRS: RatMask = RatMask(1 << 1);
    pub const EDGE: RatMask = RatMask(1 << 2);
    pub const UMTS: RatMask = RatMask(1 << 3);
    pub const IS95A: RatMask = RatMask(1 << 4);
    pub const IS95B: RatMask = RatMask(1 << 5);
    pub const ONE_X_RTT: RatMask = RatMask(1 << 6);
    pub const EVDO_0: RatMask = RatMask(1 << 7);
    pub const EVDO_A: RatMask = RatMask(1 << 8);
    pub const HSDPA: RatMask = RatMask(1 << 9);
    pub const HSUPA: RatMask = RatMask(1 << 10);
    pub const HSPA: RatMask = RatMask(1 << 11);
    pub const EVDO_B: RatMask = RatMask(1 << 12);
    pub const EHRPD: RatMask = RatMask(1 << 13);
    pub const LTE: RatMask = RatMask(1 << 14);
    pub const HSPAP: RatMask = RatMask(1 << 15);
    pub const GSM: RatMask = RatMask(1 << 16);
    pub const TD_SCDMA: RatMask = RatMask(1 << 17);
    pub const LTE_CA: RatMask = RatMask(1 << 19);
    pub const NR: RatMask = RatMask(1 << 20);

    // ─── Families ───────────────────────────────────────────────────

    /// 2G: GSM, GPRS, EDGE.
    pub const FAMILY_GSM: RatMask = RatMask(Self::GSM.0 | Self::GPRS.0 | Self::EDGE.0);
    /// 3G: UMTS and the HSPA variants.
    pub const FAMILY_WCDMA: RatMask = RatMask(
        Self::UMTS.0 | Self::HSDPA.0 | Self::HSUPA.0 | Self::HSPA.0 | Self::HSPAP.0,
    );
    /// CDMA2000 1x.
    pub const FAMILY_CDMA: RatMask = RatMask(Self::IS95A.0 | Self::IS95B.0 | Self::ONE_X_RTT.0);
    /// CDMA2000 EV-DO.
    pub const FAMILY_EVDO: RatMask =
        RatMask(Self::EVDO_0.0 | Self::EVDO_A.0 | Self::EVDO_B.0 | Self::EHRPD.0);
    /// 4G: LTE and carrier aggregation.
    pub const FAMILY_LTE: RatMask = RatMask(Self::LTE.0 | Self::LTE_CA.0);

    /// Named families accepted in configuration files, in display order.
    const NAMED: &'static [(&'static str, RatMask)] = &[
        ("gsm", Self::FAMILY_GSM),
        ("wcdma", Self::FAMILY_WCDMA),
        ("tdscdma", Self::TD_SCDMA),
        ("cdma", Self::FAMILY_CDMA),
        ("evdo", Self::FAMILY_EVDO),
        ("lte", Self::FAMILY_LTE),
        ("nr", Self::NR),
    ];

    pub const fn from_bits(bits: u32) -> Self {
        RatMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if every technology in `other` is also in `self`.
    pub const fn contains(self, other: RatMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: RatMask) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: RatMask) -> Self {
        RatMask(self.0 | other.0)
    }

    /// Number of individual technologies in the set.
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Builds a mask from family names (`"gsm"`, `"lte"`, ...).
    pub fn from_names<I, S>(names: I) -> Result<Self, CapabilityParseError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut mask = RatMask::EMPTY;
        for name in names {
            mask |= family_by_name(name.as_ref())?;
        }
        Ok(mask)
    }
}

fn family_by_name(name: &str) -> Result<RatMask, CapabilityParseError> {
    let key = name.trim().to_ascii_lowercase();
    let alias = match key.as_str() {
        "2g" => "gsm",
        "3g" | "umts" | "hspa" => "wcdma",
        "4g" => "lte",
        "5g" => "nr",
        "td-scdma" => "tdscdma",
        other => other,
    };
    RatMask::NAMED
        .iter()
        .find(|(n, _)| *n == alias)
        .map(|(_, mask)| *mask)
        .ok_or_else(|| CapabilityParseError::UnknownFamily(name.trim().to_string()))
}

impl BitOr for RatMask {
    type Output = RatMask;

    fn bitor(self, rhs: RatMask) -> RatMask {
        self.union(rhs)
    }
}

impl BitOrAssign for RatMask {
    fn bitor_assign(&mut self, rhs: RatMask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for RatMask {
    type Output = RatMask;

    fn bitand(self, rhs: RatMask) -> RatMask {
        RatMask(self.0 & rhs.0)
    }
}

impl fmt::Display for RatMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut rest = self.0;
        let mut first = true;
        for (name, mask) in RatMask::NAMED {
            if self.contains(*mask) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                rest &= !mask.0;
                first = false;
            }
        }
        if rest != 0 {
            if !first {
                write!(f, "|")?;
            }
            write!(f, "{rest:#x}")?;
        }
        Ok(())
    }
}

impl FromStr for RatMask {
    type Err = CapabilityParseError;

    /// Parses `"gsm|wcdma|lte"` (also accepts `,` as separator).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() || s.trim().eq_ignore_ascii_case("none") {
            return Ok(RatMask::EMPTY);
        }
        RatMask::from_names(s.split(['|', ',']))
    }
}

/// Error returned when parsing capability vocabulary from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityParseError {
    #[error("unknown radio access family '{0}'")]
    UnknownFamily(String),
    #[error("unknown {kind} value {value}")]
    UnknownWireValue { kind: &'static str, value: u32 },
}

// ─── Phase / Status ─────────────────────────────────────────────────────────

/// Stage of a capability switch transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Steady state, reported by a modem that is not switching.
    Configured,
    Start,
    Apply,
    /// Carried by the unsolicited report a modem sends once APPLY took effect.
    UnsolRsp,
    Finish,
}

impl Phase {
    pub fn to_wire(self) -> u32 {
        match self {
            Phase::Configured => 0,
            Phase::Start => 1,
            Phase::Apply => 2,
            Phase::UnsolRsp => 3,
            Phase::Finish => 4,
        }
    }

    pub fn from_wire(value: u32) -> Result<Self, CapabilityParseError> {
        match value {
            0 => Ok(Phase::Configured),
            1 => Ok(Phase::Start),
            2 => Ok(Phase::Apply),
            3 => Ok(Phase::UnsolRsp),
            4 => Ok(Phase::Finish),
            value => Err(CapabilityParseError::UnknownWireValue {
                kind: "phase",
                value,
            }),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Configured => write!(f, "configured"),
            Phase::Start => write!(f, "start"),
            Phase::Apply => write!(f, "apply"),
            Phase::UnsolRsp => write!(f, "unsol_rsp"),
            Phase::Finish => write!(f, "finish"),
        }
    }
}

/// Outcome carried on FINISH and on unsolicited reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Success,
    Fail,
}

impl Status {
    pub fn to_wire(self) -> u32 {
        match self {
            Status::Unknown => 0,
            Status::Success => 1,
            Status::Fail => 2,
        }
    }

    pub fn from_wire(value: u32) -> Result<Self, CapabilityParseError> {
        match value {
            0 => Ok(Status::Unknown),
            1 => Ok(Status::Success),
            2 => Ok(Status::Fail),
            value => Err(CapabilityParseError::UnknownWireValue {
                kind: "status",
                value,
            }),
        }
    }
}

// ─── Logical Modem ──────────────────────────────────────────────────────────

/// Opaque identity of the radio resource a capability is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalModemId(String);

impl LogicalModemId {
    pub fn new(id: impl Into<String>) -> Self {
        LogicalModemId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LogicalModemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalModemId {
    fn from(s: &str) -> Self {
        LogicalModemId(s.to_string())
    }
}

// ─── Radio Capability ───────────────────────────────────────────────────────

/// Capability record as requested from or reported by a modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioCapability {
    pub session_id: u32,
    pub phase: Phase,
    pub rat: RatMask,
    pub logical_modem_id: LogicalModemId,
    #[serde(default)]
    pub status: Status,
}

impl RadioCapability {
    /// A settled capability, as a modem reports it outside any transaction.
    pub fn configured(rat: RatMask, logical_modem_id: impl Into<LogicalModemId>) -> Self {
        RadioCapability {
            session_id: 0,
            phase: Phase::Configured,
            rat,
            logical_modem_id: logical_modem_id.into(),
            status: Status::Unknown,
        }
    }

    /// Same rat set and logical modem, regardless of session, phase or status.
    pub fn same_binding(&self, other: &RadioCapability) -> bool {
        self.rat == other.rat && self.logical_modem_id == other.logical_modem_id
    }

    /// Copy of this capability re-stamped for another phase of `session_id`.
    pub fn for_phase(&self, session_id: u32, phase: Phase, status: Status) -> Self {
        RadioCapability {
            session_id,
            phase,
            rat: self.rat,
            logical_modem_id: self.logical_modem_id.clone(),
            status,
        }
    }
}

impl From<String> for LogicalModemId {
    fn from(s: String) -> Self {
        LogicalModemId(s)
    }
}

impl fmt::Display for RadioCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} [{}] {:?}",
            self.session_id, self.phase, self.logical_modem_id, self.rat, self.status
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_are_disjoint() {
        let named = RatMask::NAMED;
        for (i, (a, ma)) in named.iter().enumerate() {
            for (b, mb) in &named[i + 1..] {
                assert!(!ma.intersects(*mb), "{a} overlaps {b}");
            }
        }
    }

    #[test]
    fn parse_family_names() {
        let mask: RatMask = "gsm|wcdma|lte".parse().unwrap();
        assert!(mask.contains(RatMask::GSM));
        assert!(mask.contains(RatMask::HSPAP));
        assert!(mask.contains(RatMask::LTE_CA));
        assert!(!mask.intersects(RatMask::NR));

        let aliases: RatMask = "2G, 3G ,4g".parse().unwrap();
        assert_eq!(aliases, mask);
    }

    #[test]
    fn parse_rejects_unknown_family() {
        let err = "gsm|wimax".parse::<RatMask>().unwrap_err();
        assert_eq!(err, CapabilityParseError::UnknownFamily("wimax".into()));
    }

    #[test]
    fn parse_empty_is_empty() {
        assert_eq!("".parse::<RatMask>().unwrap(), RatMask::EMPTY);
        assert_eq!("none".parse::<RatMask>().unwrap(), RatMask::EMPTY);
    }

    #[test]
    fn display_lists_families_then_leftover_bits() {
        let mask = RatMask::FAMILY_GSM | RatMask::FAMILY_LTE;
        assert_eq!(mask.to_string(), "gsm|lte");

        let partial = RatMask::FAMILY_GSM | RatMask::UMTS;
        assert_eq!(partial.to_string(), "gsm|0x8");
        assert_eq!(RatMask::EMPTY.to_string(), "none");
    }

    #[test]
    fn display_parse_consistent_for_families() {
        let mask = RatMask::FAMILY_WCDMA | RatMask::NR;
        let again: RatMask = mask.to_string().parse().unwrap();
        assert_eq!(again, mask);
    }

    #[test]
    fn phase_wire_values() {
        assert_eq!(Phase::Start.to_wire(), 1);
        assert_eq!(Phase::UnsolRsp.to_wire(), 3);
        assert_eq!(Phase::from_wire(4).unwrap(), Phase::Finish);
        assert!(Phase::from_wire(9).is_err());
        assert_eq!(Status::from_wire(2).unwrap(), Status::Fail);
        assert!(Status::from_wire(3).is_err());
    }

    #[test]
    fn same_binding_ignores_session_and_phase() {
        let a = RadioCapability::configured(RatMask::FAMILY_GSM, "modem0");
        let b = a.for_phase(7, Phase::UnsolRsp, Status::Success);
        assert!(a.same_binding(&b));

        let c = RadioCapability::configured(RatMask::FAMILY_GSM, "modem1");
        assert!(!a.same_binding(&c));
    }

    #[test]
    fn serde_uses_raw_bits_for_rat() {
        let cap = RadioCapability::configured(RatMask::GSM, "modem0");
        let json = serde_json::to_value(&cap).unwrap();
        assert_eq!(json["rat"], serde_json::json!(1 << 16));
        assert_eq!(json["phase"], serde_json::json!("configured"));
        let back: RadioCapability = serde_json::from_value(json).unwrap();
        assert_eq!(back, cap);
    }
}
