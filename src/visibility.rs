//! Which condition categories are shown, and how hidden ones appear in the legend.

use crate::assembler::SampleFilter;
use crate::error::{HeatmapError, Result};
use log::debug;
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityMode {
    AllVisible,
    PartiallyHidden,
    ComparisonOnly,
}

/// Per-category legend state handed to renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LegendVisibility {
    Visible,
    /// Excluded but still listed (dimmed, clickable).
    LegendOnly,
    Hidden,
}

/// What a transition changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityChange {
    /// The retained sample set differs; re-filter and re-track.
    SampleSetChanged,
    /// Only the presentation of excluded categories changed.
    DisplayOnly,
    Unchanged,
}

/// A pairwise comparison, written `A-vs-B`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub first: String,
    pub second: String,
}

impl Comparison {
    pub fn parse(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split("-vs-").map(str::trim).collect();
        match parts.as_slice() {
            [a, b] if !a.is_empty() && !b.is_empty() && a != b => Ok(Comparison {
                first: a.to_string(),
                second: b.to_string(),
            }),
            _ => Err(HeatmapError::InvalidComparison(s.to_string())),
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-vs-{}", self.first, self.second)
    }
}

/// Exported legend selection, one entry per condition in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendSelection {
    pub entries: Vec<(String, LegendVisibility)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityState {
    conditions: Vec<String>,
    hidden: BTreeSet<String>,
    comparison: Option<Comparison>,
    hide_unselected: bool,
}

impl VisibilityState {
    /// Everything visible; `conditions` fixes the legend order.
    pub fn new(conditions: Vec<String>) -> Self {
        VisibilityState {
            conditions,
            hidden: BTreeSet::new(),
            comparison: None,
            hide_unselected: false,
        }
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn mode(&self) -> VisibilityMode {
        if self.comparison.is_some() {
            VisibilityMode::ComparisonOnly
        } else if self.hidden.is_empty() {
            VisibilityMode::AllVisible
        } else {
            VisibilityMode::PartiallyHidden
        }
    }

    pub fn comparison(&self) -> Option<&Comparison> {
        self.comparison.as_ref()
    }

    pub fn hide_unselected(&self) -> bool {
        self.hide_unselected
    }

    pub fn is_visible(&self, label: &str) -> bool {
        match &self.comparison {
            Some(c) => label == c.first || label == c.second,
            None => !self.hidden.contains(label),
        }
    }

    pub fn visible_set(&self) -> BTreeSet<String> {
        self.conditions
            .iter()
            .filter(|c| self.is_visible(c))
            .cloned()
            .collect()
    }

    pub fn filter(&self) -> SampleFilter {
        match self.mode() {
            VisibilityMode::AllVisible => SampleFilter::All,
            _ => SampleFilter::Conditions(self.visible_set()),
        }
    }

    fn require_known(&self, label: &str) -> Result<()> {
        if self.conditions.iter().any(|c| c == label) {
            Ok(())
        } else {
            Err(HeatmapError::UnknownCondition(label.to_string()))
        }
    }

    /// Flip one condition. Ignored while comparison-only is active.
    pub fn toggle(&mut self, label: &str) -> Result<VisibilityChange> {
        self.require_known(label)?;
        if self.comparison.is_some() {
            debug!("Ignoring toggle of {} in comparison-only mode", label);
            return Ok(VisibilityChange::Unchanged);
        }
        if !self.hidden.remove(label) {
            self.hidden.insert(label.to_string());
        }
        debug!("Toggled {}, mode now {:?}", label, self.mode());
        Ok(VisibilityChange::SampleSetChanged)
    }

    /// Enter comparison-only mode with `Some`, or leave it (back to all
    /// visible) with `None`. `None` outside comparison-only mode keeps
    /// manual hides.
    pub fn set_comparison_only(
        &mut self,
        comparison: Option<Comparison>,
    ) -> Result<VisibilityChange> {
        let before = self.visible_set();
        match comparison {
            Some(c) => {
                self.require_known(&c.first)?;
                self.require_known(&c.second)?;
                self.comparison = Some(c);
            }
            None if self.comparison.is_none() => return Ok(VisibilityChange::Unchanged),
            None => {
                self.comparison = None;
                self.hidden.clear();
            }
        }
        if self.visible_set() == before {
            Ok(VisibilityChange::Unchanged)
        } else {
            Ok(VisibilityChange::SampleSetChanged)
        }
    }

    pub fn set_hide_unselected(&mut self, hide: bool) -> VisibilityChange {
        if self.hide_unselected == hide {
            return VisibilityChange::Unchanged;
        }
        self.hide_unselected = hide;
        VisibilityChange::DisplayOnly
    }

    pub fn legend_state(&self, label: &str) -> LegendVisibility {
        if self.is_visible(label) {
            LegendVisibility::Visible
        } else if self.hide_unselected {
            LegendVisibility::Hidden
        } else {
            LegendVisibility::LegendOnly
        }
    }

    pub fn legend_selection(&self) -> LegendSelection {
        LegendSelection {
            entries: self
                .conditions
                .iter()
                .map(|c| (c.clone(), self.legend_state(c)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> VisibilityState {
        VisibilityState::new(vec!["A".into(), "B".into(), "C".into()])
    }

    #[test]
    fn parse_comparison() {
        let c = Comparison::parse("ctrl-vs-treated").unwrap();
        assert_eq!(c.first, "ctrl");
        assert_eq!(c.second, "treated");
        assert_eq!(c.to_string(), "ctrl-vs-treated");
        assert!(Comparison::parse("ctrl").is_err());
        assert!(Comparison::parse("A-vs-A").is_err());
        assert!(Comparison::parse("-vs-B").is_err());
    }

    #[test]
    fn toggling_moves_between_modes() {
        let mut s = state();
        assert_eq!(s.mode(), VisibilityMode::AllVisible);
        assert_eq!(s.filter(), SampleFilter::All);

        assert_eq!(s.toggle("B").unwrap(), VisibilityChange::SampleSetChanged);
        assert_eq!(s.mode(), VisibilityMode::PartiallyHidden);
        assert_eq!(s.visible_set().into_iter().collect::<Vec<_>>(), vec!["A", "C"]);

        s.toggle("B").unwrap();
        assert_eq!(s.mode(), VisibilityMode::AllVisible);
        assert!(matches!(s.toggle("Z"), Err(HeatmapError::UnknownCondition(_))));
    }

    #[test]
    fn comparison_only_overrides_toggles() {
        let mut s = state();
        s.toggle("A").unwrap();
        let change = s
            .set_comparison_only(Some(Comparison::parse("A-vs-B").unwrap()))
            .unwrap();
        assert_eq!(change, VisibilityChange::SampleSetChanged);
        assert_eq!(s.mode(), VisibilityMode::ComparisonOnly);
        assert_eq!(s.visible_set().into_iter().collect::<Vec<_>>(), vec!["A", "B"]);

        assert_eq!(s.toggle("C").unwrap(), VisibilityChange::Unchanged);
        assert!(!s.is_visible("C"));

        s.set_comparison_only(None).unwrap();
        assert_eq!(s.mode(), VisibilityMode::AllVisible);
        assert!(s.is_visible("C"));
    }

    #[test]
    fn comparison_must_name_known_conditions() {
        let mut s = state();
        let err = s
            .set_comparison_only(Some(Comparison::parse("A-vs-Z").unwrap()))
            .unwrap_err();
        assert!(matches!(err, HeatmapError::UnknownCondition(c) if c == "Z"));
        assert_eq!(s.mode(), VisibilityMode::AllVisible);
    }

    #[test]
    fn hide_unselected_is_display_only() {
        let mut s = state();
        s.toggle("C").unwrap();
        let before = s.visible_set();
        assert_eq!(s.legend_state("C"), LegendVisibility::LegendOnly);

        assert_eq!(s.set_hide_unselected(true), VisibilityChange::DisplayOnly);
        assert_eq!(s.set_hide_unselected(true), VisibilityChange::Unchanged);
        assert_eq!(s.visible_set(), before);
        assert_eq!(s.legend_state("C"), LegendVisibility::Hidden);
        assert_eq!(
            s.legend_selection().entries,
            vec![
                ("A".to_string(), LegendVisibility::Visible),
                ("B".to_string(), LegendVisibility::Visible),
                ("C".to_string(), LegendVisibility::Hidden),
            ]
        );
    }

    #[test]
    fn clearing_absent_comparison_keeps_hides() {
        let mut s = state();
        s.toggle("B").unwrap();
        assert_eq!(s.set_comparison_only(None).unwrap(), VisibilityChange::Unchanged);
        assert_eq!(s.mode(), VisibilityMode::PartiallyHidden);
        assert!(!s.is_visible("B"));
    }
}
