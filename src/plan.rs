//! Parameter generation: per-subject, per-run trial plans.
//!
//! Counterbalancing happens entirely here, before any trial runs:
//! - run order: one persisted random permutation per subject (idempotent
//!   across reloads via the ProgressStore);
//! - stimulus order: fresh permutation of each run's sentence pool;
//! - character assignment: the run's association list rotated right by
//!   `subject mod #characters`, decorrelating characters from stimulus
//!   order while staying a deterministic function of the subject;
//! - trueSide: random for the first executed run, strict alternation after.
//!
//! Any shortfall in the content tables aborts the whole plan; there are no
//! partial plans.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::assignment::{self, Side};
use crate::config::ExperimentConfig;
use crate::content::{
    self, CharacterAssociation, CharacterId, Gender, SentenceInfo, CHARACTER_IDS,
};
use crate::progress::{now_epoch_ms, ProgressError, ProgressRecord, ProgressStore, Subject};

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("run {run_number}: {found} sentences found (< {required})")]
    InsufficientSentences {
        run_number: u32,
        found: usize,
        required: usize,
    },
    #[error("run {run_number}: no sentence-to-character association")]
    MissingAssociation { run_number: u32 },
    #[error("run {run_number}: character list has {found} entries (< {required})")]
    InsufficientCharacters {
        run_number: u32,
        found: usize,
        required: usize,
    },
    #[error("progress store error: {0}")]
    Progress(#[from] ProgressError),
}

/// Execution settings for reproducible plans.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Override the RNG seed used for run order, stimulus order and the
    /// first run's trueSide.
    pub rng_seed: Option<u64>,
}

/// Immutable description of one trial; built once at plan time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialConfig {
    pub run_index: u32,
    pub run_number: u32,
    /// 1-based position within the run.
    pub trial_index: usize,
    pub true_side: Side,
    pub subject: Subject,

    pub sentence_id: u32,
    pub category: String,
    pub theme: String,
    pub truth_value: String,

    pub character: CharacterId,
    pub gender: Gender,

    pub audio_file: String,
    pub anim_sentence_file: String,
    pub anim_wait_file: String,
    pub feedback_ok_file: String,
    pub feedback_not_ok_file: String,
    pub cue_file: String,
}

/// Parallel per-trial parameter arrays, kept for the params snapshot
/// artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunParams {
    pub sentence_names: Vec<String>,
    pub characters: Vec<CharacterId>,
    pub genders: Vec<Gender>,
    pub sentence_categ: Vec<String>,
    pub sentence_theme: Vec<String>,
    pub sentence_truth: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    /// Execution order, 1-based.
    pub run_index: u32,
    /// Content identity from the subject's run order.
    pub run_number: u32,
    pub true_side: Side,
    pub params: RunParams,
    pub trials: Vec<TrialConfig>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPlan {
    pub subject: Subject,
    pub run_order: Vec<u32>,
    pub last_run_completed: u32,
    pub runs: Vec<RunPlan>,
}

fn is_run_permutation(order: &[u32], total_runs: u32) -> bool {
    if order.len() != total_runs as usize {
        return false;
    }
    let mut seen = vec![false; total_runs as usize];
    for &r in order {
        if r < 1 || r > total_runs || seen[(r - 1) as usize] {
            return false;
        }
        seen[(r - 1) as usize] = true;
    }
    true
}

/// Loads the subject's persisted run order, generating and persisting one
/// only when absent (or unusable). Reload-safe: a second call returns the
/// identical order.
async fn obtain_progress(
    store: &dyn ProgressStore,
    subject: Subject,
    total_runs: u32,
    rng: &mut StdRng,
) -> Result<ProgressRecord, PlanError> {
    if let Some(record) = store.load(subject).await? {
        if is_run_permutation(&record.run_order, total_runs) {
            return Ok(record);
        }
        tracing::warn!(
            subject = %subject.key(),
            run_order = ?record.run_order,
            "stored run order is not a permutation of 1..={total_runs}, regenerating"
        );
    }

    let run_order: Vec<u32> = assignment::permute(rng, total_runs as usize)
        .into_iter()
        .map(|i| (i + 1) as u32)
        .collect();
    let record = ProgressRecord {
        run_order,
        last_run_completed: 0,
        created_at_ms: now_epoch_ms(),
        updated_at_ms: now_epoch_ms(),
    };
    store.save(subject, &record).await?;
    Ok(record)
}

/// Builds the complete session plan for one subject.
pub async fn build_session_plan(
    store: &dyn ProgressStore,
    subject: Subject,
    sentences: &[SentenceInfo],
    associations: &[CharacterAssociation],
    config: &ExperimentConfig,
    options: &PlanOptions,
) -> Result<SessionPlan, PlanError> {
    let mut rng = match options.rng_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let trials_per_run = config.trials_per_run;
    let record = obtain_progress(store, subject, config.total_runs, &mut rng).await?;

    let mut runs = Vec::with_capacity(config.total_runs as usize);
    let mut previous_side: Option<Side> = None;

    for (i, &run_number) in record.run_order.iter().enumerate() {
        let run_index = (i + 1) as u32;

        // Stimulus order: this run's sentence pool, shuffled, first T.
        let pool: Vec<&SentenceInfo> =
            sentences.iter().filter(|s| s.run == run_number).collect();
        if pool.len() < trials_per_run {
            return Err(PlanError::InsufficientSentences {
                run_number,
                found: pool.len(),
                required: trials_per_run,
            });
        }
        let order = assignment::permute(&mut rng, pool.len());
        let ordered: Vec<&SentenceInfo> = order[..trials_per_run]
            .iter()
            .map(|&k| pool[k])
            .collect();

        // Character assignment: rotated association list, zipped positionally.
        let association = associations
            .iter()
            .find(|a| a.run == run_number)
            .ok_or(PlanError::MissingAssociation { run_number })?;
        if association.characters.len() < trials_per_run {
            return Err(PlanError::InsufficientCharacters {
                run_number,
                found: association.characters.len(),
                required: trials_per_run,
            });
        }
        let shift = subject.number() as usize % CHARACTER_IDS.len();
        let rotated = assignment::rotate_right(&association.characters, shift);
        let run_characters = &rotated[..trials_per_run];

        let true_side = match previous_side {
            None => assignment::random_side(&mut rng),
            Some(prev) => assignment::alternate(prev),
        };
        previous_side = Some(true_side);

        let mut params = RunParams {
            sentence_names: Vec::with_capacity(trials_per_run),
            characters: Vec::with_capacity(trials_per_run),
            genders: Vec::with_capacity(trials_per_run),
            sentence_categ: Vec::with_capacity(trials_per_run),
            sentence_theme: Vec::with_capacity(trials_per_run),
            sentence_truth: Vec::with_capacity(trials_per_run),
        };
        let mut trials = Vec::with_capacity(trials_per_run);

        for (t, (&sentence, &character)) in
            ordered.iter().zip(run_characters.iter()).enumerate()
        {
            let gender = character.gender();
            let audio_file = content::sentence_audio_file(sentence, gender);

            params.sentence_names.push(
                audio_file
                    .rsplit('/')
                    .next()
                    .unwrap_or(&audio_file)
                    .to_string(),
            );
            params.characters.push(character);
            params.genders.push(gender);
            params.sentence_categ.push(sentence.category.clone());
            params.sentence_theme.push(sentence.theme.clone());
            params.sentence_truth.push(sentence.truth_value.clone());

            trials.push(TrialConfig {
                run_index,
                run_number,
                trial_index: t + 1,
                true_side,
                subject,
                sentence_id: sentence.sentence_id,
                category: sentence.category.clone(),
                theme: sentence.theme.clone(),
                truth_value: sentence.truth_value.clone(),
                character,
                gender,
                audio_file,
                anim_sentence_file: content::sentence_animation_file(true_side, character),
                anim_wait_file: content::wait_animation_file(true_side, character),
                feedback_ok_file: content::FEEDBACK_OK_FILE.to_string(),
                feedback_not_ok_file: content::FEEDBACK_NOT_OK_FILE.to_string(),
                cue_file: content::CUE_FILE.to_string(),
            });
        }

        runs.push(RunPlan {
            run_index,
            run_number,
            true_side,
            params,
            trials,
        });
    }

    Ok(SessionPlan {
        subject,
        run_order: record.run_order,
        last_run_completed: record.last_run_completed,
        runs,
    })
}


#[cfg(test)]
mod tests {
    use super::testutil::{test_associations, test_sentences};
    use super::*;
    use crate::progress::MemoryProgressStore;

    fn config() -> ExperimentConfig {
        ExperimentConfig::default()
    }

    #[tokio::test]
    async fn plan_regenerates_identical_run_order() {
        let store = MemoryProgressStore::new();
        let subject = Subject::new(7).unwrap();
        let sentences = test_sentences(6, 25);
        let associations = test_associations(6, 20);
        let options = PlanOptions::default();

        let first = build_session_plan(&store, subject, &sentences, &associations, &config(), &options)
            .await
            .unwrap();
        let second = build_session_plan(&store, subject, &sentences, &associations, &config(), &options)
            .await
            .unwrap();

        assert_eq!(first.run_order, second.run_order);
        assert!(is_run_permutation(&first.run_order, 6));
    }

    #[tokio::test]
    async fn seeded_plans_are_deterministic() {
        let sentences = test_sentences(6, 25);
        let associations = test_associations(6, 20);
        let subject = Subject::new(3).unwrap();
        let options = PlanOptions { rng_seed: Some(99) };

        let a = build_session_plan(
            &MemoryProgressStore::new(),
            subject,
            &sentences,
            &associations,
            &config(),
            &options,
        )
        .await
        .unwrap();
        let b = build_session_plan(
            &MemoryProgressStore::new(),
            subject,
            &sentences,
            &associations,
            &config(),
            &options,
        )
        .await
        .unwrap();

        assert_eq!(a.run_order, b.run_order);
        for (ra, rb) in a.runs.iter().zip(&b.runs) {
            assert_eq!(ra.true_side, rb.true_side);
            assert_eq!(ra.params.sentence_names, rb.params.sentence_names);
        }
    }

    #[tokio::test]
    async fn true_side_alternates_across_execution_order() {
        let plan = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(5).unwrap(),
            &test_sentences(6, 25),
            &test_associations(6, 20),
            &config(),
            &PlanOptions { rng_seed: Some(1) },
        )
        .await
        .unwrap();

        for pair in plan.runs.windows(2) {
            assert_eq!(pair[1].true_side, assignment::alternate(pair[0].true_side));
        }
    }

    #[tokio::test]
    async fn character_rotation_depends_on_subject() {
        let sentences = test_sentences(6, 25);
        let associations = test_associations(6, 20);
        let options = PlanOptions { rng_seed: Some(5) };

        let s1 = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(1).unwrap(),
            &sentences,
            &associations,
            &config(),
            &options,
        )
        .await
        .unwrap();
        let s2 = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(2).unwrap(),
            &sentences,
            &associations,
            &config(),
            &options,
        )
        .await
        .unwrap();

        // Same seed, adjacent subjects: character lists differ by one
        // rotation step.
        assert_ne!(s1.runs[0].params.characters, s2.runs[0].params.characters);
    }

    #[tokio::test]
    async fn insufficient_sentences_abort_with_run_number() {
        // Run pool sized below the trial count.
        let sentences = test_sentences(6, 10);
        let err = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(7).unwrap(),
            &sentences,
            &test_associations(6, 20),
            &config(),
            &PlanOptions { rng_seed: Some(2) },
        )
        .await
        .unwrap_err();

        match err {
            PlanError::InsufficientSentences {
                found, required, ..
            } => {
                assert_eq!(found, 10);
                assert_eq!(required, 20);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn short_character_list_aborts() {
        let err = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(7).unwrap(),
            &test_sentences(6, 25),
            &test_associations(6, 12),
            &config(),
            &PlanOptions { rng_seed: Some(2) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PlanError::InsufficientCharacters { .. }));
    }

    #[tokio::test]
    async fn missing_association_aborts() {
        let mut associations = test_associations(6, 20);
        associations.retain(|a| a.run != 4);
        let err = build_session_plan(
            &MemoryProgressStore::new(),
            Subject::new(7).unwrap(),
            &test_sentences(6, 25),
            &associations,
            &config(),
            &PlanOptions { rng_seed: Some(2) },
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PlanError::MissingAssociation { run_number: 4 }
        ));
    }
}
