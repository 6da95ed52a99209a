use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Optional trace-collection features a browser adapter may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    FullCdp,
    FrameTiming,
    LongTasks,
    DomSignals,
    GpuEvents,
    PaintEvents,
    SourceMaps,
    LiveMonitoring,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::FullCdp,
        Capability::FrameTiming,
        Capability::LongTasks,
        Capability::DomSignals,
        Capability::GpuEvents,
        Capability::PaintEvents,
        Capability::SourceMaps,
        Capability::LiveMonitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FullCdp => "FULL_CDP",
            Self::FrameTiming => "FRAME_TIMING",
            Self::LongTasks => "LONG_TASKS",
            Self::DomSignals => "DOM_SIGNALS",
            Self::GpuEvents => "GPU_EVENTS",
            Self::PaintEvents => "PAINT_EVENTS",
            Self::SourceMaps => "SOURCE_MAPS",
            Self::LiveMonitoring => "LIVE_MONITORING",
        }
    }

    /// What the analysis loses when the adapter lacks this capability.
    pub fn effect_when_missing(&self) -> &'static str {
        match self {
            Self::FullCdp => "protocol-level trace categories are unavailable",
            Self::FrameTiming => "frame timing is estimated from fixed frame-budget windows",
            Self::LongTasks => "long main-thread tasks will not be reported",
            Self::DomSignals => "layout thrashing and forced reflows will not be detected",
            Self::GpuEvents => {
                "GPU stalls (sync waits, texture uploads, raster) will not be detected"
            }
            Self::PaintEvents => "paint and raster overload will not be detected",
            Self::SourceMaps => "script locations are reported against generated sources",
            Self::LiveMonitoring => "continuous monitoring is unavailable",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|c| c.as_str() == normalized)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered set of capabilities declared by an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn remove(&mut self, capability: Capability) -> bool {
        self.0.remove(&capability)
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    pub fn is_superset_of(&self, required: &[Capability]) -> bool {
        required.iter().all(|c| self.0.contains(c))
    }

    /// Capabilities in `required` that this set does not provide.
    pub fn missing_from(&self, required: &[Capability]) -> Vec<Capability> {
        let mut missing: Vec<Capability> = required
            .iter()
            .copied()
            .filter(|c| !self.0.contains(c))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(capabilities: [Capability; N]) -> Self {
        capabilities.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    fn test_full_set_contains_everything() {
        let full = CapabilitySet::full();
        assert_eq!(full.len(), Capability::ALL.len());
        assert!(full.is_superset_of(&Capability::ALL));
    }

    #[rstest]
    fn test_missing_capabilities() {
        let set = CapabilitySet::full().without(Capability::GpuEvents);
        assert!(!set.is_superset_of(&[Capability::GpuEvents]));
        assert_eq!(
            set.missing_from(&[Capability::GpuEvents, Capability::PaintEvents, Capability::GpuEvents]),
            vec![Capability::GpuEvents]
        );
        assert!(set.missing_from(&[]).is_empty());
    }

    #[rstest]
    #[case("GPU_EVENTS", Some(Capability::GpuEvents))]
    #[case("gpu-events", Some(Capability::GpuEvents))]
    #[case(" long tasks ", Some(Capability::LongTasks))]
    #[case("TELEPATHY", None)]
    fn test_parse(#[case] input: &str, #[case] expected: Option<Capability>) {
        assert_eq!(Capability::parse(input), expected);
    }

    #[rstest]
    fn test_serde_names() {
        let set = CapabilitySet::from([Capability::DomSignals, Capability::FullCdp]);
        let json = serde_json::to_string(&set).expect("serialize");
        assert_eq!(json, r#"["FULL_CDP","DOM_SIGNALS"]"#);
        let back: CapabilitySet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, set);
    }
}
