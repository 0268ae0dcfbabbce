//! Orchestrator tests driven by a scripted model.
//!
//! Each test queues canned replies (or failures, or delays) on a
//! [`ScriptedModel`] and runs the full pipeline through the public API, so
//! prompts, repair, validation, refinement, correction and merge are all
//! exercised without network access.

use async_trait::async_trait;
use edgequake_card2contact::{
    extract_card, extract_card_with_cancel, extract_fields, extract_stream, CancellationToken,
    CardError, CardImage, ExtractionConfig, ExtractionProgressCallback, Field, FieldSource,
    ModelClient, ModelError, ModelReply, ModelRequest, PhoneRequeryOutcome, RefinePolicy,
    RefinementOutcome, SkipReason, Stage, StageError,
};
use futures::StreamExt;
use serde_json::json;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Test helpers ─────────────────────────────────────────────────────────────

enum Step {
    Reply(String),
    Fail(&'static str),
    Delay(Duration, String),
}

/// A model that answers from a queue and records every request.
#[derive(Default)]
struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn stages(&self) -> Vec<Stage> {
        self.requests.lock().unwrap().iter().map(|r| r.stage).collect()
    }

    fn request(&self, i: usize) -> ModelRequest {
        self.requests.lock().unwrap()[i].clone()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(&self, request: ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().unwrap().push(request);
        let step = self.steps.lock().unwrap().pop_front();
        let content = match step {
            Some(Step::Reply(content)) => content,
            Some(Step::Fail(detail)) => return Err(ModelError::new(detail)),
            Some(Step::Delay(delay, content)) => {
                tokio::time::sleep(delay).await;
                content
            }
            None => return Err(ModelError::new("script exhausted")),
        };
        Ok(ModelReply {
            content,
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

fn reply(value: serde_json::Value) -> Step {
    Step::Reply(value.to_string())
}

fn card() -> CardImage {
    CardImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10], "image/jpeg").unwrap()
}

fn config(model: &Arc<ScriptedModel>, policy: RefinePolicy) -> ExtractionConfig {
    ExtractionConfig::builder()
        .client(Arc::clone(model) as Arc<dyn ModelClient>)
        .refine_policy(policy)
        .build()
        .unwrap()
}

// ── Example scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn matching_guesses_are_kept_and_phone_normalised() {
    let raw = "Maria Souza\nGerente de Vendas\nAcme Corp\nmaria@acme.com.br\n(11) 98765-4321";
    let model = ScriptedModel::new(vec![reply(json!({
        "rawText": raw,
        "name": "Maria Souza",
        "email": "maria@acme.com.br",
        "phone": "(11) 98765-4321",
        "company": "Acme Corp",
        "jobTitle": "Gerente de Vendas",
    }))]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::WhenIncomplete))
        .await
        .unwrap();
    let e = &out.extract;

    assert_eq!(e.name.as_deref(), Some("Maria Souza"));
    assert_eq!(e.company.as_deref(), Some("Acme Corp"));
    assert_eq!(e.job_title.as_deref(), Some("Gerente de Vendas"));
    assert_eq!(e.email.as_deref(), Some("maria@acme.com.br"));
    assert_eq!(e.phone.as_deref(), Some("11987654321"));
    assert_eq!(e.raw_text.as_deref(), Some(raw));

    assert_eq!(model.stages(), vec![Stage::Extraction]);
    assert_eq!(
        out.stats.refinement,
        RefinementOutcome::Skipped {
            reason: SkipReason::ExtractComplete
        }
    );
    assert!(!out.stats.company_corrected);
    assert_eq!(out.stats.total_input_tokens, 100);
}

#[tokio::test]
async fn company_prefers_transcript_line_matching_email_domain() {
    let raw = "João Silva\nAcme Corp\njoao@acme.com\n(11) 3333-4444";
    let model = ScriptedModel::new(vec![reply(json!({
        "rawText": raw,
        "name": "João Silva",
        "email": "joao@acme.com",
        "phone": "(11) 3333-4444",
        "company": "ACME",
        "jobTitle": null,
    }))]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    assert_eq!(out.primary.company.as_deref(), Some("ACME"));
    assert_eq!(out.extract.company.as_deref(), Some("Acme Corp"));
    assert_eq!(out.extract.source(Field::Company), Some(FieldSource::EmailDomain));
    assert!(out.stats.company_corrected);
}

#[tokio::test]
async fn hallucinated_phone_is_rejected() {
    let raw = "Maria Souza\nAcme Corp\nmaria@acme.com.br";
    let model = ScriptedModel::new(vec![
        reply(json!({
            "rawText": raw,
            "name": "Maria Souza",
            "email": "maria@acme.com.br",
            "phone": "+1 555 000 0000",
            "company": "Acme Corp",
            "jobTitle": null,
        })),
        // the phone-only re-query repeats the invention
        reply(json!({ "phone": "+1 555 000 0000" })),
    ]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    assert_eq!(out.extract.phone, None);
    assert_eq!(out.extract.confidence(Field::Phone), 0.0);
    assert_eq!(out.stats.phone_requery, PhoneRequeryOutcome::NotFound);
    assert_eq!(model.stages(), vec![Stage::Extraction, Stage::PhoneRequery]);
    assert_eq!(out.stats.model_calls, 2);
    assert!(model.request(1).image.is_some());
}

#[tokio::test]
async fn malformed_json_is_repaired_before_validation() {
    let model = ScriptedModel::new(vec![Step::Reply(
        r#"{rawText: "Joao\njoao@x.com", name: Joao, email: joao@x.com}"#.to_string(),
    )]);
    let config = ExtractionConfig::builder()
        .client(Arc::clone(&model) as Arc<dyn ModelClient>)
        .phone_requery(false)
        .refine_policy(RefinePolicy::Never)
        .build()
        .unwrap();

    let out = extract_card(&card(), &config).await.unwrap();

    assert!(out.stats.primary_parsed);
    assert_eq!(out.extract.name.as_deref(), Some("Joao"));
    assert_eq!(out.extract.email.as_deref(), Some("joao@x.com"));
    assert_eq!(out.extract.source(Field::Name), Some(FieldSource::Model));
    assert_eq!(out.stats.phone_requery, PhoneRequeryOutcome::Disabled);
}

#[tokio::test]
async fn refinement_timeout_keeps_pre_refinement_extract() {
    let raw = "Ana Lima\nSpaceMoon\nana@spacemoon.com.br";
    let vision = ScriptedModel::new(vec![reply(json!({
        "rawText": raw,
        "name": "Ana Lima",
        "email": "ana@spacemoon.com.br",
        "phone": null,
        "company": "Space Moon",
        "jobTitle": null,
    }))]);
    let text = ScriptedModel::new(vec![Step::Delay(
        Duration::from_secs(5),
        json!({ "company": "SpaceMoon" }).to_string(),
    )]);
    let config = ExtractionConfig::builder()
        .client(Arc::clone(&vision) as Arc<dyn ModelClient>)
        .refine_client(Arc::clone(&text) as Arc<dyn ModelClient>)
        .phone_requery(false)
        .refine_policy(RefinePolicy::Always)
        .api_timeout_secs(1)
        .build()
        .unwrap();

    let out = extract_card(&card(), &config).await.unwrap();

    assert_eq!(out.extract, out.primary);
    assert_eq!(
        out.stats.refinement,
        RefinementOutcome::Unavailable {
            error: StageError::Timeout {
                stage: Stage::Refinement,
                secs: 1
            }
        }
    );
    assert!(!out.stats.company_corrected);
    assert_eq!(text.stages(), vec![Stage::Refinement]);
}

#[tokio::test]
async fn missing_company_filled_from_email_domain() {
    let raw = "Ana Lima\nana@spacemoon.com.br\n(11) 3333-4444";
    let model = ScriptedModel::new(vec![reply(json!({
        "rawText": raw,
        "name": "Ana Lima",
        "email": "ana@spacemoon.com.br",
        "phone": "(11) 3333-4444",
        "company": null,
        "jobTitle": null,
    }))]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    assert_eq!(out.primary.company, None);
    assert_eq!(out.extract.company.as_deref(), Some("Spacemoon"));
    assert_eq!(out.extract.confidence(Field::Company), 0.75);
    assert_eq!(out.extract.phone.as_deref(), Some("1133334444"));
}

#[tokio::test]
async fn company_fill_does_not_reuse_the_job_title_line() {
    let raw = "Maria Souza\nGerente de Vendas\nAcme Corp\nmaria@gmail.com\n(11) 98765-4321";
    let model = ScriptedModel::new(vec![reply(json!({
        "rawText": raw,
        "name": "Maria Souza",
        "email": "maria@gmail.com",
        "phone": "(11) 98765-4321",
        "company": null,
        "jobTitle": "Gerente de Vendas",
    }))]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    let e = &out.extract;
    assert_eq!(e.job_title.as_deref(), Some("Gerente de Vendas"));
    assert_eq!(e.source(Field::JobTitle), Some(FieldSource::Model));
    assert_eq!(e.company.as_deref(), Some("Acme Corp"));
    assert_eq!(e.source(Field::Company), Some(FieldSource::Heuristic));
}

#[tokio::test]
async fn two_phones_on_one_line_yield_the_first() {
    let raw = "Ana Lima\nTel (11) 3333-4444 (11) 98765-4321\nana@spacemoon.com.br";
    let model = ScriptedModel::new(vec![
        reply(json!({
            "rawText": raw,
            "name": "Ana Lima",
            "email": "ana@spacemoon.com.br",
            "phone": null,
        })),
        reply(json!({ "phone": null })),
    ]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    assert_eq!(out.stats.phone_requery, PhoneRequeryOutcome::NotFound);
    assert_eq!(out.extract.phone.as_deref(), Some("1133334444"));
    assert_eq!(out.extract.source(Field::Phone), Some(FieldSource::Heuristic));
}

#[tokio::test]
async fn repair_keeps_punctuation_inside_the_transcript() {
    let model = ScriptedModel::new(vec![Step::Reply(
        r#"{"rawText": "Ana Lima\nTel: 11 3333-4444, ana@spacemoon.com.br", name: Ana Lima, phone: 11 3333-4444}"#
            .to_string(),
    )]);
    let config = ExtractionConfig::builder()
        .client(Arc::clone(&model) as Arc<dyn ModelClient>)
        .phone_requery(false)
        .refine_policy(RefinePolicy::Never)
        .build()
        .unwrap();

    let out = extract_card(&card(), &config).await.unwrap();

    assert!(out.stats.primary_parsed);
    assert_eq!(
        out.extract.raw_text.as_deref(),
        Some("Ana Lima\nTel: 11 3333-4444, ana@spacemoon.com.br")
    );
    assert_eq!(out.extract.source(Field::Name), Some(FieldSource::Model));
    assert_eq!(out.extract.phone.as_deref(), Some("1133334444"));
    assert_eq!(out.extract.source(Field::Phone), Some(FieldSource::Model));
}

// ── Refinement ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn refinement_fixes_swapped_heuristic_fields() {
    let raw = "Carlos Pereira\nDiretor Comercial\nGlobex Industrias\ncarlos@gmail.com\n(21) 2222-3333";
    let model = ScriptedModel::new(vec![
        reply(json!({
            "rawText": raw,
            "name": "Carlos Pereira",
            "email": "carlos@gmail.com",
            "phone": "(21) 2222-3333",
            "company": null,
            "jobTitle": null,
        })),
        Step::Reply(format!(
            "Here is the JSON:\n```json\n{}\n```",
            json!({
                "name": "Carlos Pereira Jr.",
                "email": "carlos@gmail.com",
                "phone": "(21) 2222-3333",
                "company": "Globex Industrias",
                "jobTitle": "Diretor Comercial",
            })
        )),
    ]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Always)).await.unwrap();

    // heuristics read the lines in the wrong roles
    assert_eq!(out.primary.company.as_deref(), Some("Diretor Comercial"));
    assert_eq!(out.primary.source(Field::Company), Some(FieldSource::Heuristic));

    let e = &out.extract;
    assert_eq!(e.company.as_deref(), Some("Globex Industrias"));
    assert_eq!(e.job_title.as_deref(), Some("Diretor Comercial"));
    assert_eq!(e.source(Field::JobTitle), Some(FieldSource::Refinement));
    // the invented suffix is not in the transcript
    assert_eq!(e.name.as_deref(), Some("Carlos Pereira"));
    assert_eq!(e.source(Field::Name), Some(FieldSource::Model));

    assert_eq!(out.stats.refinement, RefinementOutcome::Applied);
    assert_eq!(out.stats.model_calls, 2);

    let refine = model.request(1);
    assert_eq!(refine.stage, Stage::Refinement);
    assert!(refine.image.is_none());
    assert!(refine.prompt.contains("EXTRACTED TEXT:"));
    assert!(refine.prompt.ends_with(raw));
}

#[tokio::test]
async fn refinement_uses_configured_context_prompt() {
    let raw = "Ana Lima\nana@spacemoon.com.br";
    let model = ScriptedModel::new(vec![
        reply(json!({ "rawText": raw, "name": "Ana Lima" })),
        Step::Reply("no idea".to_string()),
    ]);
    let config = ExtractionConfig::builder()
        .client(Arc::clone(&model) as Arc<dyn ModelClient>)
        .phone_requery(false)
        .refine_policy(RefinePolicy::Always)
        .context_prompt("Cards from the Recife trade fair.")
        .build()
        .unwrap();

    let out = extract_card(&card(), &config).await.unwrap();

    assert!(model.request(1).prompt.starts_with("Cards from the Recife trade fair."));
    assert_eq!(out.stats.refinement, RefinementOutcome::Unparseable);
    assert_eq!(out.extract.email.as_deref(), Some("ana@spacemoon.com.br"));
}

// ── Failures and cancellation ────────────────────────────────────────────────

#[tokio::test]
async fn primary_failure_is_fatal() {
    let model = ScriptedModel::new(vec![Step::Fail("HTTP 500")]);
    let err = extract_card(&card(), &config(&model, RefinePolicy::Never))
        .await
        .unwrap_err();
    match err {
        CardError::ExtractionFailed { detail } => assert!(detail.contains("HTTP 500")),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn phone_requery_failure_is_not_fatal() {
    let raw = "Ana Lima\nSpaceMoon\nana@spacemoon.com.br";
    let model = ScriptedModel::new(vec![
        reply(json!({ "rawText": raw, "name": "Ana Lima", "email": "ana@spacemoon.com.br" })),
        Step::Fail("connection reset"),
    ]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Never)).await.unwrap();

    assert_eq!(out.extract.name.as_deref(), Some("Ana Lima"));
    assert!(matches!(
        out.stats.phone_requery,
        PhoneRequeryOutcome::Failed {
            error: StageError::ModelFailed { stage: Stage::PhoneRequery, .. }
        }
    ));
}

#[tokio::test]
async fn cancellation_aborts_without_result() {
    let model = ScriptedModel::new(vec![Step::Delay(Duration::from_secs(10), "{}".to_string())]);
    let config = config(&model, RefinePolicy::Never);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = extract_card_with_cancel(&card(), &config, &cancel).await.unwrap_err();
    assert!(matches!(err, CardError::Cancelled));
}

#[tokio::test]
async fn unparseable_primary_reply_falls_back_to_heuristics() {
    let text = "Maria Souza\nAcme Corp\nmaria@acme.com.br\n(11) 98765-4321";
    let model = ScriptedModel::new(vec![Step::Reply(text.to_string())]);

    let out = extract_fields(
        &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A],
        "image/png",
        &config(&model, RefinePolicy::Never),
    )
    .await
    .unwrap();

    assert_eq!(out.raw_text.as_deref(), Some(text));
    assert_eq!(out.name.as_deref(), Some("Maria Souza"));
    assert_eq!(out.phone.as_deref(), Some("11987654321"));
    assert_eq!(out.source(Field::Name), Some(FieldSource::Heuristic));
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_returned_field_is_grounded_and_scores_bounded() {
    let raw = "Pedro Alves\nAlves & Filhos\npedro@alves.com.br\nRua das Flores 100\n(81) 3030-4040";
    let model = ScriptedModel::new(vec![
        reply(json!({
            "rawText": raw,
            "name": "Pedro Alves Neto",
            "email": "pedro.alves@gmail.com",
            "phone": "81 99999-0000",
            "company": "Alves e Filhos Ltda",
            "jobTitle": "CEO",
        })),
        reply(json!({ "phone": "(81) 3030-4040" })),
        reply(json!({ "name": "Pedro", "company": "Banco Central", "jobTitle": "Gerente" })),
    ]);

    let out = extract_card(&card(), &config(&model, RefinePolicy::Always)).await.unwrap();
    let e = &out.extract;
    let transcript = e.raw_text.as_deref().unwrap().to_lowercase();
    let digits: String = transcript.chars().filter(|c| c.is_ascii_digit()).collect();

    for field in Field::ALL {
        let score = e.confidence(field);
        assert!((0.0..=1.0).contains(&score), "{field} score {score}");
        match e.value(field) {
            None => assert_eq!(score, 0.0, "{field} is empty but scored"),
            Some(v) if field == Field::Phone => assert!(digits.contains(v), "phone {v}"),
            Some(v) => v
                .to_lowercase()
                .split_whitespace()
                .for_each(|w| assert!(transcript.contains(w), "{field} '{v}' not grounded")),
        }
    }
    assert_eq!(e.phone.as_deref(), Some("8130304040"));
    assert_eq!(out.stats.phone_requery, PhoneRequeryOutcome::Found);
    assert_eq!(out.primary.source(Field::Phone), Some(FieldSource::PhoneRequery));
}

// ── Batch stream ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct Counting {
    started: AtomicUsize,
    completed: AtomicUsize,
    errors: AtomicUsize,
    batch_done: Mutex<Option<(usize, usize)>>,
}

impl ExtractionProgressCallback for Counting {
    fn on_card_start(&self, _index: usize, _total: usize, _input: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_card_complete(&self, _index: usize, _total: usize, _filled_fields: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
    fn on_card_error(&self, _index: usize, _total: usize, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, total: usize, success_count: usize) {
        *self.batch_done.lock().unwrap() = Some((total, success_count));
    }
}

#[tokio::test]
async fn stream_reports_each_card_and_continues_after_failures() {
    let mut file = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
    file.write_all(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]).unwrap();
    let path = file.path().to_string_lossy().to_string();

    let model = ScriptedModel::new(vec![reply(json!({
        "rawText": "Ana Lima\nana@spacemoon.com.br\n(11) 3333-4444",
        "name": "Ana Lima",
        "email": "ana@spacemoon.com.br",
        "phone": "11 3333-4444",
    }))]);
    let progress = Arc::new(Counting::default());
    let config = ExtractionConfig::builder()
        .client(Arc::clone(&model) as Arc<dyn ModelClient>)
        .refine_policy(RefinePolicy::Never)
        .concurrency(2)
        .progress_callback(Arc::clone(&progress) as Arc<dyn ExtractionProgressCallback>)
        .build()
        .unwrap();

    let inputs = vec!["/definitely/not/a/card.jpg".to_string(), path];
    let mut results: Vec<_> = extract_stream(inputs, &config).unwrap().collect().await;
    results.sort_by_key(|r| r.index);

    assert_eq!(results.len(), 2);
    assert!(!results[0].is_success());
    assert!(results[0].error.as_deref().unwrap().contains("not found"));
    assert!(results[1].is_success());
    let output = results[1].output.as_ref().unwrap();
    assert_eq!(output.extract.company.as_deref(), Some("Spacemoon"));

    assert_eq!(progress.started.load(Ordering::SeqCst), 2);
    assert_eq!(progress.completed.load(Ordering::SeqCst), 1);
    assert_eq!(progress.errors.load(Ordering::SeqCst), 1);
    assert_eq!(*progress.batch_done.lock().unwrap(), Some((2, 1)));
}
