//! Pipeline stages after the three activation paths.
//!
//! Every stage works on the full list of processed records. Excluded records
//! stay in the list so they can be counted and logged; only the sticky
//! override ever flips one back to included.

use std::collections::HashMap;

use lorebook::{ActivationMethod, BotId, ExclusionReason, PersonaId};

use super::probability::ProbabilitySource;
use super::state::ConversationState;
use super::types::ActivatedEntry;

/// Share of the vector score added when an entry also matched by keyword.
pub const HYBRID_VECTOR_WEIGHT: f64 = 0.5;

/// Union of the three paths by entry ID.
///
/// Keyword records win conflicts; a vector hit on a keyword record adds its
/// similarity and half of its score. Output order is keyword records, then
/// vector-only records, then constant records.
pub fn merge_activations(
    keyword: Vec<ActivatedEntry>,
    vector: Vec<ActivatedEntry>,
    constant: Vec<ActivatedEntry>,
) -> Vec<ActivatedEntry> {
    let mut merged = keyword;
    let mut index: HashMap<_, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, a)| (a.id().clone(), i))
        .collect();

    for hit in vector.into_iter().chain(constant) {
        match index.get(hit.id()) {
            Some(&i) => {
                let existing = &mut merged[i];
                if hit.vector_similarity.is_some() && existing.vector_similarity.is_none() {
                    existing.vector_similarity = hit.vector_similarity;
                    existing.activation_score += hit.activation_score * HYBRID_VECTOR_WEIGHT;
                }
            }
            None => {
                index.insert(hit.id().clone(), merged.len());
                merged.push(hit);
            }
        }
    }
    merged
}

/// Exclude entries whose bot or persona gate rejects this conversation.
pub fn apply_filters(
    entries: &mut [ActivatedEntry],
    bot: Option<&BotId>,
    persona: Option<&PersonaId>,
) {
    for activated in entries.iter_mut().filter(|a| a.included) {
        if !activated.entry.filtering.permits(bot, persona) {
            activated.exclude(ExclusionReason::FilterExcluded);
        }
    }
}

/// Delay, then cooldown, then the sticky override.
///
/// Delay is final. An active sticky window re-includes anything excluded so
/// far and marks the record as sticky-forced.
pub fn apply_timed_effects(entries: &mut [ActivatedEntry], state: &ConversationState, index: u32) {
    for activated in entries.iter_mut() {
        if index < activated.entry.advanced_activation.delay {
            if activated.included {
                activated.exclude(ExclusionReason::DelayNotMet);
            }
            continue;
        }

        let Some(entry_state) = state.entry(activated.id()) else {
            continue;
        };

        if activated.included && entry_state.in_cooldown(index) {
            activated.exclude(ExclusionReason::CooldownActive);
        }

        if !activated.included && entry_state.is_sticky(index) {
            activated.include();
            activated.sticky_forced = true;
        }
    }
}

/// Exclude gated entries whose draw exceeds their probability.
///
/// Sticky-forced entries are not gated.
pub fn apply_probability(entries: &mut [ActivatedEntry], source: &dyn ProbabilitySource) {
    for activated in entries.iter_mut() {
        if !activated.included || activated.sticky_forced {
            continue;
        }
        let settings = &activated.entry.activation_settings;
        if !settings.use_probability || settings.probability >= 100 {
            continue;
        }
        let probability = f64::from(settings.probability);
        if source.roll() > probability {
            activated.exclude(ExclusionReason::ProbabilityFailed);
        }
    }
}

/// Keep only the best included member of each competing group.
///
/// Members are ranked by `activation_score * group_weight`; on a tie the
/// earlier record wins.
pub fn apply_group_scoring(entries: &mut [ActivatedEntry]) {
    let mut winners: HashMap<String, usize> = HashMap::new();
    for (i, activated) in entries.iter().enumerate() {
        if !activated.included {
            continue;
        }
        let Some(group) = activated.group.as_ref() else {
            continue;
        };
        match winners.get(group) {
            Some(&best) if entries[best].group_score() >= activated.group_score() => {}
            _ => {
                winners.insert(group.clone(), i);
            }
        }
    }

    for (i, activated) in entries.iter_mut().enumerate() {
        if !activated.included {
            continue;
        }
        if let Some(group) = activated.group.as_ref() {
            if winners.get(group) != Some(&i) {
                activated.exclude(ExclusionReason::GroupScoringLost);
            }
        }
    }
}

/// Record this turn's inclusions.
///
/// Sticky carry-overs matched nothing this turn and leave their windows as
/// they are. Every other included record reopens its windows, including one
/// that matched but was only kept by its sticky window.
pub fn update_conversation_state(
    state: &mut ConversationState,
    included: &[ActivatedEntry],
    index: u32,
) {
    state.current_index = index;
    for activated in included {
        let timing = activated.entry.advanced_activation;
        state.record_activation(
            activated.id(),
            index,
            timing.sticky,
            timing.cooldown,
            activated.method != ActivationMethod::Sticky,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::FixedProbability;
    use lorebook::{ActivationMethod, EntryId, KnowledgeEntry, UserId};
    use std::sync::Arc;

    fn record(entry: KnowledgeEntry, method: ActivationMethod, score: f64) -> ActivatedEntry {
        ActivatedEntry::new(Arc::new(entry), method, score, 10)
    }

    fn entry(id: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(UserId::from("u1"), format!("content {id}")).with_id(id)
    }

    fn vector_hit(id: &str, similarity: f64) -> ActivatedEntry {
        let mut hit = record(entry(id), ActivationMethod::Vector, similarity * 100.0);
        hit.vector_similarity = Some(similarity);
        hit
    }

    #[test]
    fn test_merge_boosts_keyword_record() {
        let keyword = vec![record(entry("both").with_order(7), ActivationMethod::Keyword, 4.0)];
        let vector = vec![vector_hit("both", 0.8), vector_hit("only_vector", 0.9)];
        let merged = merge_activations(keyword, vector, Vec::new());

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].method, ActivationMethod::Keyword);
        assert_eq!(merged[0].order, 7);
        assert!((merged[0].activation_score - (4.0 + 0.5 * 80.0)).abs() < 1e-9);
        assert_eq!(merged[0].vector_similarity, Some(0.8));
        assert_eq!(merged[1].id().as_str(), "only_vector");
    }

    #[test]
    fn test_merge_keeps_one_record_per_entry() {
        let merged = merge_activations(
            Vec::new(),
            vec![vector_hit("v", 0.8), vector_hit("v", 0.75)],
            vec![record(entry("c"), ActivationMethod::Constant, 100.0)],
        );
        let ids: Vec<_> = merged.iter().map(|a| a.id().as_str()).collect();
        assert_eq!(ids, vec!["v", "c"]);
        assert!((merged[0].activation_score - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_filters() {
        let mut gated = entry("gated");
        gated.filtering.bots.enabled = true;
        gated.filtering.bots.allow = vec![BotId::from("mira")];
        let mut denied = entry("denied");
        denied.filtering.personas.enabled = true;
        denied.filtering.personas.deny = vec![PersonaId::from("ash")];

        let mut entries = vec![
            record(gated, ActivationMethod::Keyword, 1.0),
            record(denied, ActivationMethod::Keyword, 1.0),
            record(entry("open"), ActivationMethod::Keyword, 1.0),
        ];
        apply_filters(&mut entries, Some(&BotId::from("other")), Some(&PersonaId::from("ash")));

        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::FilterExcluded));
        assert_eq!(entries[1].exclusion_reason, Some(ExclusionReason::FilterExcluded));
        assert!(entries[2].included);
    }

    #[test]
    fn test_delay_beats_sticky() {
        let mut state = ConversationState::new();
        state.record_activation(&EntryId::from("d"), 1, 10, 0, true);
        let mut entries = vec![record(
            entry("d").with_timing(0, 0, 5),
            ActivationMethod::Keyword,
            1.0,
        )];
        apply_timed_effects(&mut entries, &state, 3);
        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::DelayNotMet));
    }

    #[test]
    fn test_cooldown_and_sticky_override() {
        let mut state = ConversationState::new();
        state.record_activation(&EntryId::from("cool"), 5, 0, 3, true);
        state.record_activation(&EntryId::from("stuck"), 5, 2, 3, true);
        let mut filtered = record(entry("filtered"), ActivationMethod::Keyword, 1.0);
        filtered.exclude(ExclusionReason::FilterExcluded);
        state.record_activation(&EntryId::from("filtered"), 5, 1, 0, true);

        let mut entries = vec![
            record(entry("cool"), ActivationMethod::Keyword, 1.0),
            record(entry("stuck"), ActivationMethod::Keyword, 1.0),
            filtered,
        ];
        apply_timed_effects(&mut entries, &state, 6);

        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::CooldownActive));
        assert!(entries[1].included);
        assert!(entries[1].sticky_forced);
        assert!(entries[2].included);
        assert!(entries[2].sticky_forced);
    }

    #[test]
    fn test_probability_gate() {
        let mut entries = vec![
            record(entry("half").with_probability(50), ActivationMethod::Keyword, 1.0),
            record(entry("always"), ActivationMethod::Keyword, 1.0),
            record(entry("forced").with_probability(10), ActivationMethod::Sticky, 0.0),
        ];
        entries[2].sticky_forced = true;
        apply_probability(&mut entries, &FixedProbability(60.0));

        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::ProbabilityFailed));
        assert!(entries[1].included);
        assert!(entries[2].included);

        let mut passing = vec![record(
            entry("half").with_probability(50),
            ActivationMethod::Keyword,
            1.0,
        )];
        apply_probability(&mut passing, &FixedProbability(50.0));
        assert!(passing[0].included);
    }

    #[test]
    fn test_probability_can_be_disabled() {
        let mut gated = entry("off").with_probability(5);
        gated.activation_settings.use_probability = false;
        let mut entries = vec![record(gated, ActivationMethod::Keyword, 1.0)];
        apply_probability(&mut entries, &FixedProbability(99.0));
        assert!(entries[0].included);
    }

    #[test]
    fn test_group_scoring() {
        let mut entries = vec![
            record(entry("a").in_group("weather", 1.0), ActivationMethod::Keyword, 4.0),
            record(entry("b").in_group("weather", 2.0), ActivationMethod::Keyword, 3.0),
            record(entry("c").in_group("weather", 1.0), ActivationMethod::Keyword, 6.0),
            record(entry("solo"), ActivationMethod::Keyword, 1.0),
        ];
        apply_group_scoring(&mut entries);

        let included: Vec<_> = entries
            .iter()
            .filter(|a| a.included)
            .map(|a| a.id().as_str())
            .collect();
        assert_eq!(included, vec!["b", "solo"]);
        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::GroupScoringLost));
        assert_eq!(entries[2].exclusion_reason, Some(ExclusionReason::GroupScoringLost));
    }

    #[test]
    fn test_group_tie_keeps_first() {
        let mut entries = vec![
            record(entry("first").in_group("g", 1.0), ActivationMethod::Keyword, 2.0),
            record(entry("second").in_group("g", 1.0), ActivationMethod::Keyword, 2.0),
        ];
        apply_group_scoring(&mut entries);
        assert!(entries[0].included);
        assert!(!entries[1].included);
    }

    #[test]
    fn test_group_ignores_excluded_members() {
        let mut entries = vec![
            record(entry("strong").in_group("g", 1.0), ActivationMethod::Keyword, 9.0),
            record(entry("weak").in_group("g", 1.0), ActivationMethod::Keyword, 1.0),
        ];
        entries[0].exclude(ExclusionReason::CooldownActive);
        apply_group_scoring(&mut entries);
        assert!(entries[1].included);
        assert_eq!(entries[0].exclusion_reason, Some(ExclusionReason::CooldownActive));
    }

    #[test]
    fn test_state_update() {
        let mut state = ConversationState::new();
        let mut carried = record(entry("carried").with_timing(2, 0, 0), ActivationMethod::Sticky, 0.0);
        carried.sticky_forced = true;
        let mut rescued = record(entry("rescued").with_timing(3, 2, 0), ActivationMethod::Keyword, 2.0);
        rescued.sticky_forced = true;
        let included = vec![
            record(entry("fresh").with_timing(2, 3, 0), ActivationMethod::Keyword, 1.0),
            carried,
            rescued,
        ];
        update_conversation_state(&mut state, &included, 9);

        assert_eq!(state.current_index, 9);
        let fresh = state.entry(&EntryId::from("fresh")).unwrap();
        assert_eq!(fresh.sticky_until, Some(11));
        assert_eq!(fresh.cooldown_until, Some(12));
        let carried = state.entry(&EntryId::from("carried")).unwrap();
        assert_eq!(carried.last_activated_at, 9);
        assert!(carried.sticky_until.is_none());
        let rescued = state.entry(&EntryId::from("rescued")).unwrap();
        assert_eq!(rescued.sticky_until, Some(12));
        assert_eq!(rescued.cooldown_until, Some(11));
    }

}
