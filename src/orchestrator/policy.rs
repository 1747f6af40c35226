use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Maps a caller-supplied concurrency hint to the number of compute units to spawn.
///
/// Whatever the underlying function returns, [`UnitCountPolicy::unit_count`] is at least 1.
#[derive(Clone)]
pub struct UnitCountPolicy {
    name: Cow<'static, str>,
    count: Arc<dyn Fn(u32) -> u32 + Send + Sync>,
}

impl UnitCountPolicy {
    /// Name of [`UnitCountPolicy::reserve_two`].
    pub const RESERVE_TWO: &'static str = "reserve-two";
    /// Name of [`UnitCountPolicy::match_hint`].
    pub const MATCH_HINT: &'static str = "match-hint";
    /// Name of [`UnitCountPolicy::oversample`].
    pub const OVERSAMPLE: &'static str = "oversample";

    /// `max(hint - 2, 1)`.
    pub fn reserve_two() -> Self {
        Self::named(Self::RESERVE_TWO, |hint| hint.saturating_sub(2))
    }

    /// `max(hint, 1)`: one unit per available core.
    pub fn match_hint() -> Self {
        Self::named(Self::MATCH_HINT, |hint| hint)
    }

    /// `max(hint * 2, 1)`: two units per core.
    pub fn oversample() -> Self {
        Self::named(Self::OVERSAMPLE, |hint| hint.saturating_mul(2))
    }

    /// Always spawn `units` units, ignoring the hint.
    pub fn fixed(units: u32) -> Self {
        Self {
            name: Cow::Owned(format!("fixed-{units}")),
            count: Arc::new(move |_| units),
        }
    }

    /// Arbitrary policy function.
    pub fn custom(
        name: impl Into<Cow<'static, str>>,
        count: impl Fn(u32) -> u32 + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            count: Arc::new(count),
        }
    }

    fn named(name: &'static str, count: fn(u32) -> u32) -> Self {
        Self {
            name: Cow::Borrowed(name),
            count: Arc::new(count),
        }
    }

    /// Policy name, as accepted by [`str::parse`] for the built-in policies.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of units to spawn for `hint`, never less than 1.
    pub fn unit_count(&self, hint: u32) -> u32 {
        (self.count)(hint).max(1)
    }
}

impl Default for UnitCountPolicy {
    fn default() -> Self {
        Self::reserve_two()
    }
}

impl fmt::Debug for UnitCountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UnitCountPolicy").field(&self.name).finish()
    }
}

impl fmt::Display for UnitCountPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for UnitCountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::RESERVE_TWO => Ok(Self::reserve_two()),
            Self::MATCH_HINT => Ok(Self::match_hint()),
            Self::OVERSAMPLE => Ok(Self::oversample()),
            _ => {
                if let Some(n) = s.strip_prefix("fixed-") {
                    let units = n
                        .parse::<u32>()
                        .map_err(|e| format!("invalid fixed unit count '{n}': {e}"))?;
                    return Ok(Self::fixed(units));
                }
                Err(format!(
                    "unknown unit count policy '{s}' (expected {}, {}, {} or fixed-<n>)",
                    Self::RESERVE_TWO,
                    Self::MATCH_HINT,
                    Self::OVERSAMPLE
                ))
            }
        }
    }
}

impl serde::Serialize for UnitCountPolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

impl<'de> serde::Deserialize<'de> for UnitCountPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/orchestrator/policy.rs"]
mod tests;
