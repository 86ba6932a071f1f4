use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fastworkflow_core::config::{NluConfig, MAX_VOTE_WORKERS};
use fastworkflow_core::types::NluPipelineStage;
use fastworkflow_llm::{IntentModel, ScoredPrediction};
use fastworkflow_registry::builtins;
use fastworkflow_registry::WorkflowDefinition;

use crate::cache::UtteranceCache;
use crate::fuzzy;

/// Result of one intent-classification attempt.
#[derive(Debug, Clone, Default)]
pub struct PredictionOutput {
    /// Fully qualified command name, when resolved.
    pub command_name: Option<String>,
    /// The parameter-bearing text: the utterance with a matched command
    /// prefix stripped, else the utterance unchanged.
    pub remainder: String,
    /// Non-empty when the classifier returned an ambiguous candidate set.
    pub ambiguous_candidates: Vec<String>,
    pub error_message: Option<String>,
    pub is_builtin_command: bool,
}

impl PredictionOutput {
    fn resolved(definition: &WorkflowDefinition, name: &str, remainder: String) -> Self {
        let is_builtin = definition
            .command(name)
            .map(|c| c.is_builtin)
            .unwrap_or(false);
        Self {
            command_name: Some(name.to_string()),
            remainder,
            is_builtin_command: is_builtin,
            ..Default::default()
        }
    }

    fn none(remainder: String) -> Self {
        Self {
            remainder,
            ..Default::default()
        }
    }
}

/// Two-tier fuzzy + neural command-name predictor with majority voting and
/// utterance caching (C4).
pub struct IntentClassifier {
    small: Arc<dyn IntentModel>,
    large: Arc<dyn IntentModel>,
    config: NluConfig,
}

impl IntentClassifier {
    pub fn new(small: Arc<dyn IntentModel>, large: Arc<dyn IntentModel>, config: NluConfig) -> Self {
        Self { small, large, config }
    }

    /// Resolve a command name for `utterance` in `context_name` at `stage`.
    ///
    /// Resolution order (first hit wins): command-prefix parse, exact match
    /// of special built-in utterances, utterance-cache lookup, fuzzy match,
    /// two-tier neural prediction. Cache and neural steps run only during
    /// intent detection; clarification stages fall back to "what can i do".
    pub async fn predict(
        &self,
        definition: &WorkflowDefinition,
        cache: &UtteranceCache,
        context_name: &str,
        utterance: &str,
        stage: NluPipelineStage,
        agentic: bool,
        cancel: Option<&CancellationToken>,
    ) -> PredictionOutput {
        let utterance = utterance.trim();
        let universe = self.candidate_universe(definition, cache, context_name, stage);
        let bare_names: BTreeMap<String, String> = universe
            .iter()
            .map(|qualified| {
                let bare = fastworkflow_registry::split_qualified(qualified).1;
                (bare.to_lowercase(), qualified.clone())
            })
            .collect();

        // 1. Command-prefix parse: `<command_name> rest...` or `<command_name>(...)`.
        let head = utterance
            .split(' ')
            .next()
            .unwrap_or("")
            .split('(')
            .next()
            .unwrap_or("");
        if let Some(qualified) = bare_names.get(&head.to_lowercase()) {
            let remainder = utterance[head.len()..]
                .trim_start_matches('(')
                .trim_end_matches(')')
                .trim()
                .to_string();
            debug!(command = %qualified, "command-prefix match");
            return PredictionOutput::resolved(definition, qualified, remainder);
        }

        // 2. Exact-utterance match for the special built-ins.
        if let Some(builtin) = self.match_correction_verb(definition, utterance, stage) {
            return PredictionOutput::resolved(definition, &builtin, utterance.to_string());
        }

        if stage == NluPipelineStage::IntentDetection {
            // 3. Utterance-cache lookup via the embedding hook.
            if let Some(label) = self.cache_lookup(cache, utterance, cancel).await {
                if universe.contains(&label) {
                    return PredictionOutput::resolved(definition, &label, utterance.to_string());
                }
            }
        }

        // 4. Fuzzy match against the known command names.
        let max_distance = 1.0 - self.config.fuzzy_match_threshold;
        if let Some((bare, distance)) = fuzzy::find_best_match(
            &utterance.replace(' ', "_"),
            bare_names.keys().map(String::as_str),
            max_distance,
        ) {
            let qualified = &bare_names[&bare];
            debug!(command = %qualified, distance, "fuzzy match");
            return PredictionOutput::resolved(definition, qualified, utterance.to_string());
        }

        if stage != NluPipelineStage::IntentDetection {
            // Unmatched clarification input: show the command list again
            // rather than guessing.
            return PredictionOutput::resolved(
                definition,
                builtins::WHAT_CAN_I_DO,
                utterance.to_string(),
            );
        }

        // 5. Two-tier neural prediction with optional majority voting.
        let labels: Vec<String> = universe
            .iter()
            .filter(|name| {
                // Correction verbs are exact-matched above, never predicted.
                !name.starts_with("ErrorCorrection/")
            })
            .cloned()
            .collect();
        match self.neural_predict(utterance, &labels, cancel).await {
            Candidates::Single(name) => {
                PredictionOutput::resolved(definition, &name, utterance.to_string())
            }
            Candidates::Ambiguous(candidates) => {
                if let Err(e) = cache.store_suggested_commands(&candidates, 1) {
                    warn!(error = %e, "failed to store suggested commands");
                }
                let message = ambiguous_command_message(&candidates, agentic);
                PredictionOutput {
                    remainder: utterance.to_string(),
                    ambiguous_candidates: candidates,
                    error_message: Some(message),
                    ..Default::default()
                }
            }
            Candidates::None => PredictionOutput::none(utterance.to_string()),
        }
    }

    /// Exact match of the special built-in plain utterances, honoring
    /// per-stage availability: `abort` outside intent detection,
    /// `you_misunderstood` outside misunderstanding clarification,
    /// `what_can_i_do` always.
    pub fn match_correction_verb(
        &self,
        definition: &WorkflowDefinition,
        utterance: &str,
        stage: NluPipelineStage,
    ) -> Option<String> {
        let normalized = utterance.trim().to_lowercase();
        let mut specials = vec![builtins::WHAT_CAN_I_DO];
        if stage != NluPipelineStage::IntentDetection {
            specials.push(builtins::ABORT);
        }
        if stage != NluPipelineStage::IntentMisunderstandingClarification {
            specials.push(builtins::YOU_MISUNDERSTOOD);
        }
        for name in specials {
            let Some(descriptor) = definition.command(name) else {
                continue;
            };
            if descriptor
                .plain_utterances
                .iter()
                .any(|u| u.to_lowercase() == normalized)
            {
                return Some(name.to_string());
            }
        }
        None
    }

    /// Embed text for cache seeding. Errors degrade to `None` and are
    /// logged; the cache entry is simply skipped.
    pub async fn embed(&self, text: &str, cancel: Option<&CancellationToken>) -> Option<Vec<f32>> {
        match self.small.embed(text, cancel).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                warn!(error = %e, "embedding failed");
                None
            }
        }
    }

    fn candidate_universe(
        &self,
        definition: &WorkflowDefinition,
        cache: &UtteranceCache,
        context_name: &str,
        stage: NluPipelineStage,
    ) -> Vec<String> {
        match stage {
            NluPipelineStage::IntentAmbiguityClarification => {
                // Restricted to the previously-stored suggestion list plus
                // the correction verbs.
                let mut universe = cache.suggested_commands().unwrap_or_default();
                universe.push(builtins::ABORT.to_string());
                universe.push(builtins::WHAT_CAN_I_DO.to_string());
                universe
            }
            NluPipelineStage::IntentMisunderstandingClarification => {
                // Intent-detection built-ins plus the current context's own
                // commands (not the parent chain).
                let mut universe: Vec<String> = definition
                    .own_command_names(context_name)
                    .into_iter()
                    .collect();
                universe.extend(
                    definition
                        .own_command_names(builtins::INTENT_DETECTION)
                        .into_iter(),
                );
                universe.push(builtins::ABORT.to_string());
                universe
            }
            _ => definition.get_command_names(context_name).into_iter().collect(),
        }
    }

    async fn cache_lookup(
        &self,
        cache: &UtteranceCache,
        utterance: &str,
        cancel: Option<&CancellationToken>,
    ) -> Option<String> {
        if cache.entry_count().ok()? == 0 {
            return None;
        }
        let embedding = self.embed(utterance, cancel).await?;
        match cache.match_embedding(&embedding, self.config.cache_similarity_threshold) {
            Ok(Some((label, similarity))) => {
                debug!(label, similarity, "utterance cache hit");
                Some(label)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "utterance cache lookup failed");
                None
            }
        }
    }

    /// Small tier first; below the confidence threshold the large tier is
    /// consulted (with optional majority voting).
    async fn neural_predict(
        &self,
        utterance: &str,
        labels: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Candidates {
        if labels.is_empty() {
            return Candidates::None;
        }

        match self.small.predict(utterance, labels, cancel).await {
            Ok(predictions) => {
                if let Some(top) = predictions.first() {
                    if top.score >= self.config.confidence_threshold {
                        return self.candidates_from(&predictions);
                    }
                }
            }
            Err(e) => warn!(error = %e, model = self.small.name(), "small classifier failed"),
        }

        match self.majority_vote(utterance, labels, cancel).await {
            Ok(predictions) => self.candidates_from(&predictions),
            Err(e) => {
                warn!(error = %e, model = self.large.name(), "large classifier failed");
                Candidates::None
            }
        }
    }

    /// Run N parallel large-tier predictions and keep the candidate set with
    /// the highest vote count. Failed runs are skipped; if all fail, fall
    /// back to a single direct prediction.
    async fn majority_vote(
        &self,
        utterance: &str,
        labels: &[String],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ScoredPrediction>, fastworkflow_llm::ProviderError> {
        let n = self.config.majority_vote_count;
        if n <= 1 {
            return self.large.predict(utterance, labels, cancel).await;
        }

        let workers = n.min(MAX_VOTE_WORKERS);
        let mut join_set = JoinSet::new();
        for _ in 0..workers {
            let model = self.large.clone();
            let utterance = utterance.to_string();
            let labels = labels.to_vec();
            let cancel = cancel.cloned();
            join_set.spawn(async move {
                model.predict(&utterance, &labels, cancel.as_ref()).await
            });
        }

        let mut runs: Vec<Vec<ScoredPrediction>> = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(predictions)) => runs.push(predictions),
                Ok(Err(e)) => warn!(error = %e, "vote prediction failed"),
                Err(e) => warn!(error = %e, "vote task panicked"),
            }
        }

        if runs.is_empty() {
            warn!("all parallel predictions failed, falling back to a single prediction");
            return self.large.predict(utterance, labels, cancel).await;
        }

        // Vote on the candidate set each run implies, not raw scores.
        let mut votes: BTreeMap<Vec<String>, (usize, usize)> = BTreeMap::new();
        for (i, run) in runs.iter().enumerate() {
            let mut set = self.within_gap(run);
            set.sort();
            let entry = votes.entry(set).or_insert((0, i));
            entry.0 += 1;
        }
        let winner_index = votes
            .values()
            .max_by_key(|(count, _)| *count)
            .map(|(_, i)| *i)
            .unwrap_or(0);
        Ok(runs.swap_remove(winner_index))
    }

    /// Labels whose score is within the ambiguity gap of the top score.
    /// A gap equal to the threshold is a single pick; strictly less is
    /// ambiguous.
    fn within_gap(&self, predictions: &[ScoredPrediction]) -> Vec<String> {
        let Some(top) = predictions.first() else {
            return Vec::new();
        };
        if top.score <= 0.0 {
            return Vec::new();
        }
        predictions
            .iter()
            .filter(|p| p.score > 0.0 && (top.score - p.score) < self.config.ambiguous_confidence_threshold)
            .map(|p| p.label.clone())
            .collect()
    }

    fn candidates_from(&self, predictions: &[ScoredPrediction]) -> Candidates {
        let set = self.within_gap(predictions);
        match set.len() {
            0 => Candidates::None,
            1 => Candidates::Single(set.into_iter().next().unwrap()),
            _ => Candidates::Ambiguous(set),
        }
    }
}

enum Candidates {
    Single(String),
    Ambiguous(Vec<String>),
    None,
}

/// Message shown when the classifier returns an ambiguous candidate set.
pub fn ambiguous_command_message(candidates: &[String], agentic: bool) -> String {
    let command_list = candidates
        .iter()
        .map(|c| fastworkflow_registry::split_qualified(c).1.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n");
    let instruction = if agentic {
        "Choose the correct command name from these possible options and update your command:\n"
    } else {
        "Please choose a command name from these possible options:\n"
    };
    format!(
        "The command is ambiguous. {instruction}{command_list}\n\n\
         or type 'what can i do' to see all commands\nor type 'abort' to cancel"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastworkflow_llm::LexicalIntentModel;
    use std::io::Write;
    use std::path::Path;

    fn write(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = std::fs::File::create(path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
    }

    fn definition(dir: &Path) -> WorkflowDefinition {
        write(
            &dir.join("_commands/add_two_numbers.json"),
            r#"{"parameters": [
                {"name": "first_num", "type": "float", "required": true},
                {"name": "second_num", "type": "float", "required": true}
            ], "plain_utterances": ["add two numbers"]}"#,
        );
        write(
            &dir.join("_commands/User/set_current_user.json"),
            r#"{"plain_utterances": ["set the current user"]}"#,
        );
        write(
            &dir.join("_commands/User/set_user_status.json"),
            r#"{"plain_utterances": ["set the user status"]}"#,
        );
        WorkflowDefinition::load(dir).unwrap()
    }

    fn classifier() -> IntentClassifier {
        let small: Arc<dyn IntentModel> = Arc::new(
            LexicalIntentModel::new()
                .with_examples("User/set_current_user", &["set the current user"])
                .with_examples("User/set_user_status", &["set the user status"]),
        );
        IntentClassifier::new(small.clone(), small, NluConfig::default())
    }

    #[tokio::test]
    async fn command_prefix_bypasses_all_scoring() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "*",
                "add_two_numbers first_num=5 second_num=3",
                NluPipelineStage::IntentDetection,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some("add_two_numbers"));
        assert_eq!(out.remainder, "first_num=5 second_num=3");
        assert!(!out.is_builtin_command);
    }

    #[tokio::test]
    async fn exact_abort_matches_in_clarification_stage() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "*",
                "never mind",
                NluPipelineStage::IntentAmbiguityClarification,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some(builtins::ABORT));
        assert!(out.is_builtin_command);
    }

    #[tokio::test]
    async fn fuzzy_match_accepts_near_command_names() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "*",
                "add two numbrs",
                NluPipelineStage::IntentDetection,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some("add_two_numbers"));
    }

    #[tokio::test]
    async fn cache_hit_short_circuits_neural_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        let embedding = clf.embed("set the current user to unsh", None).await.unwrap();
        cache
            .store_utterance("set the current user to unsh", "User/set_current_user", &embedding)
            .unwrap();

        let out = clf
            .predict(
                &def,
                &cache,
                "User",
                "set the current user to unsh",
                NluPipelineStage::IntentDetection,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some("User/set_current_user"));
    }

    #[tokio::test]
    async fn close_candidates_are_ambiguous_and_stored() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        // "set the current user" and "set the user status" both share tokens
        // with this utterance; the lexical scores land within the gap.
        let out = clf
            .predict(
                &def,
                &cache,
                "User",
                "set the user",
                NluPipelineStage::IntentDetection,
                false,
                None,
            )
            .await;
        assert!(out.command_name.is_none());
        assert!(out.ambiguous_candidates.len() >= 2);
        assert!(out.error_message.unwrap().contains("ambiguous"));
        assert_eq!(cache.flag().unwrap(), 1);
        assert_eq!(
            cache.suggested_commands().unwrap().len(),
            out.ambiguous_candidates.len()
        );
    }

    #[tokio::test]
    async fn ambiguity_stage_restricts_universe_to_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        cache
            .store_suggested_commands(
                &["User/set_current_user".into(), "User/set_user_status".into()],
                1,
            )
            .unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "User",
                "set_current_user",
                NluPipelineStage::IntentAmbiguityClarification,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some("User/set_current_user"));
    }

    #[tokio::test]
    async fn unmatched_clarification_falls_back_to_what_can_i_do() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        cache
            .store_suggested_commands(&["User/set_current_user".into()], 1)
            .unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "User",
                "xyzzy gibberish",
                NluPipelineStage::IntentAmbiguityClarification,
                false,
                None,
            )
            .await;
        assert_eq!(out.command_name.as_deref(), Some(builtins::WHAT_CAN_I_DO));
    }

    #[tokio::test]
    async fn no_match_anywhere_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let def = definition(dir.path());
        let cache = UtteranceCache::open_in_memory().unwrap();
        let clf = classifier();

        let out = clf
            .predict(
                &def,
                &cache,
                "*",
                "qwerty asdf zxcv",
                NluPipelineStage::IntentDetection,
                false,
                None,
            )
            .await;
        assert!(out.command_name.is_none());
        assert!(out.ambiguous_candidates.is_empty());
    }
}
