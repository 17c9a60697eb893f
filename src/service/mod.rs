//! Rules Service
//!
//! Principles:
//! - Every load is checked against the ruleset on disk; stale facts are refused
//! - A ruleset hash compiles once per process, shared by every session
//! - Loads materialize; queries only read
//! - Every call is counted and logged, successful or not

mod errors;
mod wire;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::analysis::{Program, Whitelist};
use crate::config::ServiceConfig;
use crate::domain::{check_contract, DomainPack};
use crate::eval::{evaluate, run_query, CancelToken, QueryPattern};
use crate::observability::{log_event, Event, MetricsRegistry, ObservationScope, Timer};
use crate::ruleset::{InMemoryProgramCache, ProgramCache, RulesetLoader, RulesetSource};
use crate::store::{FactWindow, Session, SessionRegistry, DEFAULT_SESSION};

pub use errors::{ServiceError, ServiceResult};
pub use wire::{
    CitedFact, Explanation, Health, LoadFactsRequest, LoadOutcome, QueryRequest, QueryResponse,
};

pub struct RulesService {
    config: ServiceConfig,
    loader: RulesetLoader,
    cache: Arc<dyn ProgramCache>,
    sessions: SessionRegistry,
    domain: DomainPack,
    metrics: Arc<MetricsRegistry>,
}

impl RulesService {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_cache(config, Arc::new(InMemoryProgramCache::new()))
    }

    pub fn with_cache(config: ServiceConfig, cache: Arc<dyn ProgramCache>) -> Self {
        Self {
            loader: RulesetLoader::new(config.rules_dir.clone()),
            domain: DomainPack::from_config(&config),
            sessions: SessionRegistry::with_capacity(config.max_sessions),
            metrics: Arc::new(MetricsRegistry::new()),
            cache,
            config,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn ensure_enabled(&self) -> ServiceResult<()> {
        if self.config.enabled {
            Ok(())
        } else {
            Err(ServiceError::Disabled)
        }
    }

    /// Hash of the rule files currently on disk
    pub fn ruleset_hash(&self) -> ServiceResult<String> {
        Ok(self.loader.current_hash()?)
    }

    /// Compiled program for the current rule files.
    pub fn program(&self) -> ServiceResult<Arc<Program>> {
        let source = self.loader.read()?;
        self.compile(&source)
    }

    fn compile(&self, source: &RulesetSource) -> ServiceResult<Arc<Program>> {
        let metrics = &self.metrics;
        let mut compile = || {
            let scope = ObservationScope::with_fields("RULESET_COMPILE", &[("hash", source.hash())]);
            metrics.increment_compilations();
            let compiled = source
                .compile(&DomainPack::compile_options())
                .and_then(|program| check_contract(&program).map(|_| program));
            match &compiled {
                Ok(program) => {
                    let rules = program.rules().len().to_string();
                    let strata = program.strata().len().to_string();
                    scope.complete();
                    log_event(
                        Event::RulesetCompiled,
                        &[("hash", source.hash()), ("rules", &rules), ("strata", &strata)],
                    );
                }
                Err(err) => {
                    metrics.increment_compile_failures();
                    scope.fail(err.code());
                    log_event(
                        Event::RulesetCompileFailed,
                        &[("hash", source.hash()), ("code", err.code()), ("reason", &err.to_string())],
                    );
                }
            }
            compiled
        };
        Ok(self.cache.get_or_compile(source.hash(), &mut compile)?)
    }

    /// Validates and admits a batch, materializes it and installs it as the
    /// session's window. Nothing changes if any step fails.
    pub fn load_facts(&self, req: &LoadFactsRequest, cancel: &CancelToken) -> ServiceResult<LoadOutcome> {
        let session = req.session.as_deref().unwrap_or(DEFAULT_SESSION).to_string();
        let result = self.ensure_enabled().and_then(|_| self.materialize(req, &session, cancel));

        match &result {
            Ok(outcome) => {
                self.metrics
                    .record_facts_load(outcome.admitted as u64, outcome.ms_eval);
                log_event(
                    Event::FactsLoaded,
                    &[
                        ("session", &session),
                        ("admitted", &outcome.admitted.to_string()),
                        ("derived", &outcome.derived.to_string()),
                        ("ms", &outcome.ms_eval.to_string()),
                    ],
                );
            }
            Err(err) => {
                self.metrics.record_facts_rejected(req.facts.len() as u64);
                self.report(Event::FactsRejected, err, &session);
            }
        }
        result
    }

    fn materialize(
        &self,
        req: &LoadFactsRequest,
        session: &str,
        cancel: &CancelToken,
    ) -> ServiceResult<LoadOutcome> {
        let timer = Timer::new();
        let max = self.config.window_max_facts;
        if req.facts.len() > max {
            return Err(ServiceError::WindowExceeded {
                count: req.facts.len(),
                max,
            });
        }

        let source = self.loader.read()?;
        if req.ruleset_hash != source.hash() {
            return Err(ServiceError::RulesetMismatch {
                given: req.ruleset_hash.clone(),
                current: source.hash().to_string(),
            });
        }
        let program = self.compile(&source)?;

        let policy = self.domain.policy(&program);
        let mut window = FactWindow::admit(&program, &req.facts, max, &policy)?;
        window.append_ambient(self.domain.ambient_facts(&program));

        let now = evaluation_time(req.as_of)?;
        let model = evaluate(
            Arc::clone(&program),
            window.facts(),
            &self.domain.params(now),
            cancel,
        )?;

        let outcome = LoadOutcome {
            admitted: window.client_len(),
            ruleset_hash: program.hash().to_string(),
            session: session.to_string(),
            derived: model.derived(),
            ms_eval: timer.elapsed_ms(),
        };
        cancel.check()?;
        let replaced = self.sessions.replace(Session {
            name: session.to_string(),
            window,
            model,
            loaded_at: Utc::now(),
        });
        if let Some(evicted) = replaced.evicted {
            log_event(
                Event::SessionEvicted,
                &[("session", evicted.name.as_str()), ("loaded", session)],
            );
        }
        Ok(outcome)
    }

    /// Answers a query from the session's materialized model.
    pub fn query(&self, req: &QueryRequest, cancel: &CancelToken) -> ServiceResult<QueryResponse> {
        let session = req.session.as_deref().unwrap_or(DEFAULT_SESSION);
        let result = self.ensure_enabled().and_then(|_| self.answer(req, session, cancel));

        match &result {
            Ok(response) => {
                self.metrics.record_query(&req.predicate, response.ms_eval);
                log_event(
                    Event::QueryEvaluated,
                    &[
                        ("predicate", &req.predicate),
                        ("rows", &response.rows.len().to_string()),
                        ("ms", &response.ms_eval.to_string()),
                    ],
                );
            }
            Err(err) => {
                self.metrics.increment_queries_rejected();
                self.report(Event::QueryRejected, err, session);
            }
        }
        result
    }

    fn answer(&self, req: &QueryRequest, session: &str, cancel: &CancelToken) -> ServiceResult<QueryResponse> {
        let timer = Timer::new();
        let loaded = self
            .sessions
            .get(session)
            .ok_or_else(|| ServiceError::WindowNotLoaded(session.to_string()))?;
        let program = loaded.model.program();

        let shape = Whitelist::new(program).query(&req.predicate, &req.args)?;
        self.domain.check_query(&shape)?;
        cancel.check()?;

        let pattern = QueryPattern {
            predicate: shape.predicate,
            args: shape.args,
            limit: req.limit,
            explain: req.explain,
        };
        let result = run_query(&loaded.model, &pattern)?;

        let provenance = result.provenance.map(|records| {
            records
                .into_iter()
                .map(|record| Explanation {
                    rule_id: record.rule_id,
                    facts: record
                        .facts
                        .iter()
                        .filter_map(|&r| {
                            loaded.window.fact(r).map(|fact| CitedFact {
                                fact_ref: r,
                                pred: fact.pred.clone(),
                                args: fact.args.clone(),
                            })
                        })
                        .collect(),
                })
                .collect()
        });

        Ok(QueryResponse {
            rows: result.rows.iter().map(|row| row.to_vec()).collect(),
            provenance,
            ms_eval: timer.elapsed_ms(),
        })
    }

    /// Always available, even when disabled.
    pub fn health(&self) -> Health {
        Health {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            enabled: self.config.enabled,
            ruleset_hash: self.loader.current_hash().ok(),
            programs_cached: self.cache.len(),
            sessions: self.sessions.len(),
        }
    }

    fn report(&self, event: Event, err: &ServiceError, session: &str) {
        let reason = err.to_string();
        let fields = [
            ("session", session),
            ("kind", err.kind()),
            ("code", err.code()),
            ("reason", reason.as_str()),
        ];
        match err {
            ServiceError::Disabled => log_event(Event::KillSwitchRefused, &fields),
            ServiceError::Timeout | ServiceError::Cancelled => log_event(Event::EvalCancelled, &fields),
            e if e.is_internal() => log_event(Event::RequestFailed, &fields),
            _ => log_event(event, &fields),
        }
    }
}

fn evaluation_time(as_of: Option<i64>) -> ServiceResult<DateTime<Utc>> {
    match as_of {
        None => Ok(Utc::now()),
        Some(secs) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| ServiceError::ShapeMismatch(format!("as_of {} is not a valid timestamp", secs))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FactInput;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    const RULES: &str = r#"
input ocr_field(card: id, field: string, confidence: number, captured_at: number).
input img_phash(card: id, hash: string, bucket: number).
output valid_card(card: id).
output duplicate_of(a: id, b: id).
output price_for(card: id, strategy: string, price: number).
valid_card(C) :- ocr_field(C, "title", Conf, _), Conf >= $ocr_title_min.
duplicate_of(A, B) :- img_phash(A, H1, K), img_phash(B, H2, K), A < B,
                      hamming(H1, H2) <= $phash_hamming_max.
price_for(C, "weighted", Conf) :- ocr_field(C, "price", Conf, _).
"#;

    fn service(enabled: bool) -> (TempDir, RulesService) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pack.dl"), RULES).unwrap();
        let config = ServiceConfig {
            enabled,
            rules_dir: dir.path().to_path_buf(),
            window_max_facts: 4,
            ..ServiceConfig::default()
        };
        (dir, RulesService::new(config))
    }

    fn load(service: &RulesService, facts: Vec<FactInput>) -> ServiceResult<LoadOutcome> {
        let req = LoadFactsRequest {
            ruleset_hash: service.ruleset_hash().unwrap(),
            facts,
            session: None,
            as_of: None,
        };
        service.load_facts(&req, &CancelToken::new())
    }

    fn title(card: &str, conf: f64) -> FactInput {
        FactInput::new("ocr_field", vec![json!(card), json!("title"), json!(conf), json!(0)])
    }

    #[test]
    fn test_disabled_refuses_work() {
        let (_dir, service) = service(false);
        assert_eq!(load(&service, vec![]).unwrap_err(), ServiceError::Disabled);
        let err = service
            .query(&QueryRequest::new("valid_card", vec![]), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ServiceError::Disabled);
        assert!(!service.health().enabled);
    }

    #[test]
    fn test_load_then_query() {
        let (_dir, service) = service(true);
        let outcome = load(&service, vec![title("c1", 0.98), title("c2", 0.5)]).unwrap();
        assert_eq!(outcome.admitted, 2);
        assert_eq!(outcome.session, DEFAULT_SESSION);

        let resp = service
            .query(&QueryRequest::new("valid_card", vec![]), &CancelToken::new())
            .unwrap();
        assert_eq!(resp.rows, vec![vec![crate::model::Value::id("c1")]]);

        let snapshot = service.metrics().snapshot();
        assert_eq!(snapshot.facts_loaded, 2);
        assert_eq!(snapshot.queries_evaluated, 1);
        assert_eq!(snapshot.compilations, 1);
    }

    #[test]
    fn test_stale_hash_is_refused() {
        let (_dir, service) = service(true);
        let req = LoadFactsRequest {
            ruleset_hash: "stale".into(),
            facts: vec![],
            session: None,
            as_of: None,
        };
        match service.load_facts(&req, &CancelToken::new()).unwrap_err() {
            ServiceError::RulesetMismatch { given, current } => {
                assert_eq!(given, "stale");
                assert_eq!(current, service.ruleset_hash().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_window_cap() {
        let (_dir, service) = service(true);
        let facts: Vec<FactInput> = (0..5).map(|i| title(&format!("c{}", i), 0.99)).collect();
        assert_eq!(
            load(&service, facts.clone()).unwrap_err(),
            ServiceError::WindowExceeded { count: 5, max: 4 }
        );
        assert_eq!(load(&service, facts[..4].to_vec()).unwrap().admitted, 4);
        assert_eq!(service.metrics().snapshot().facts_rejected, 5);
    }

    #[test]
    fn test_query_before_load() {
        let (_dir, service) = service(true);
        let err = service
            .query(&QueryRequest::new("valid_card", vec![]), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err, ServiceError::WindowNotLoaded(DEFAULT_SESSION.into()));
    }

    #[test]
    fn test_query_validation() {
        let (_dir, service) = service(true);
        load(&service, vec![title("c1", 0.98)]).unwrap();
        let cancel = CancelToken::new();

        let err = service.query(&QueryRequest::new("ocr_field", vec![]), &cancel).unwrap_err();
        assert_eq!(err.kind(), "UnknownPredicate");

        let err = service
            .query(&QueryRequest::new("valid_card", vec![json!("c1"), json!("c2")]), &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), "ShapeMismatch");

        let err = service
            .query(
                &QueryRequest::new("price_for", vec![json!("c1"), json!("median"), json!("_")]),
                &cancel,
            )
            .unwrap_err();
        assert_eq!(err, ServiceError::StrategyUnknown("median".into()));
        assert_eq!(service.metrics().snapshot().queries_rejected, 3);
    }

    #[test]
    fn test_explain_cites_facts() {
        let (_dir, service) = service(true);
        load(
            &service,
            vec![
                FactInput::new("img_phash", vec![json!("c1"), json!("F00DBABE"), json!(42)]),
                FactInput::new("img_phash", vec![json!("c2"), json!("F00DBABC"), json!(42)]),
            ],
        )
        .unwrap();

        let mut req = QueryRequest::new("duplicate_of", vec![]);
        req.explain = true;
        let resp = service.query(&req, &CancelToken::new()).unwrap();
        assert_eq!(resp.rows.len(), 1);

        let provenance = resp.provenance.unwrap();
        assert_eq!(provenance[0].rule_id, "pack.dl#2");
        let refs: Vec<u32> = provenance[0].facts.iter().map(|f| f.fact_ref).collect();
        assert_eq!(refs, vec![0, 1]);
        assert_eq!(provenance[0].facts[0].pred, "img_phash");
    }

    #[test]
    fn test_cancelled_load_keeps_previous_window() {
        let (_dir, service) = service(true);
        load(&service, vec![title("c1", 0.98)]).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let req = LoadFactsRequest {
            ruleset_hash: service.ruleset_hash().unwrap(),
            facts: vec![title("c9", 0.99)],
            session: None,
            as_of: None,
        };
        assert_eq!(service.load_facts(&req, &cancel).unwrap_err(), ServiceError::Cancelled);

        let resp = service
            .query(&QueryRequest::new("valid_card", vec![]), &CancelToken::new())
            .unwrap();
        assert_eq!(resp.rows.len(), 1);
    }

    #[test]
    fn test_session_cap_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("pack.dl"), RULES).unwrap();
        let service = RulesService::new(ServiceConfig {
            enabled: true,
            rules_dir: dir.path().to_path_buf(),
            max_sessions: 2,
            ..ServiceConfig::default()
        });

        for name in ["s1", "s2", "s3"] {
            let req = LoadFactsRequest {
                ruleset_hash: service.ruleset_hash().unwrap(),
                facts: vec![title("c1", 0.98)],
                session: Some(name.into()),
                as_of: None,
            };
            service.load_facts(&req, &CancelToken::new()).unwrap();
        }
        assert_eq!(service.health().sessions, 2);

        let mut req = QueryRequest::new("valid_card", vec![]);
        req.session = Some("s1".into());
        assert_eq!(
            service.query(&req, &CancelToken::new()).unwrap_err(),
            ServiceError::WindowNotLoaded("s1".into())
        );
        req.session = Some("s3".into());
        assert_eq!(service.query(&req, &CancelToken::new()).unwrap().rows.len(), 1);
    }

    #[test]
    fn test_health_reports_state() {
        let (_dir, service) = service(true);
        assert_eq!(service.health().programs_cached, 0);
        load(&service, vec![title("c1", 0.98)]).unwrap();

        let health = service.health();
        assert!(health.enabled);
        assert_eq!(health.programs_cached, 1);
        assert_eq!(health.sessions, 1);
        assert_eq!(health.ruleset_hash, service.ruleset_hash().ok());
    }
}
