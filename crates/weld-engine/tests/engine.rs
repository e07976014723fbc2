//! End-to-end engine behavior: evaluation laws, pool lifecycle and
//! dispatch scenarios.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

use weld_core::{
    ApiError, ApiResult, BotApi, Event, EventCategory, MessagePayload, Session, Value,
};
use weld_engine::{
    CachePolicy, Clock, CmdArgs, Engine, Evaluator, Field, FieldRegistry, Gate, IntSchema,
    LocaleTable, Localizer, MapLocalizer, RegexMatch, StandardConfig, StandardFields, TargetItem,
    Verdict, all, any,
};

struct NullApi;

#[async_trait]
impl BotApi for NullApi {
    fn id(&self) -> &str {
        "bot-1"
    }

    async fn call_api(
        &self,
        _action: &str,
        _params: serde_json::Value,
    ) -> ApiResult<serde_json::Value> {
        Err(ApiError::NotConnected)
    }
}

fn message_session(raw: &str) -> Session {
    let event = Event::message(
        "test",
        "bot-1",
        MessagePayload::from_raw("u1", None, raw, &["/".to_string()]),
    );
    Session::new(Arc::new(event), Arc::new(NullApi))
}

fn test_clock(start: u64) -> (Clock, Arc<AtomicU64>) {
    let time = Arc::new(AtomicU64::new(start));
    let handle = Arc::clone(&time);
    let clock: Clock = Arc::new(move || handle.load(Ordering::SeqCst));
    (clock, time)
}

/// A field whose extractor logs its name and counts invocations.
fn recording_field(
    name: &'static str,
    priority: i32,
    value: Value,
    log: &Arc<Mutex<Vec<&'static str>>>,
    calls: &Arc<AtomicUsize>,
) -> Field {
    let log = Arc::clone(log);
    let calls = Arc::clone(calls);
    Field::from_fn(name, move |_session| {
        log.lock().unwrap().push(name);
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value.clone())
    })
    .priority(priority)
}

fn text_field() -> Field {
    Field::from_fn("text", |session| {
        Ok(session
            .event()
            .as_message()
            .map_or(Value::Null, |m| Value::Str(m.text.clone())))
    })
    .unique()
    .categories([EventCategory::Message])
}

// =============================================================================
// Evaluation laws
// =============================================================================

#[tokio::test]
async fn positive_priority_clause_extracts_first() {
    let registry = FieldRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let lo = registry
        .register(recording_field("lo", 0, Value::Bool(true), &log, &calls))
        .unwrap();
    let hi = registry
        .register(recording_field("hi", 5, Value::Bool(true), &log, &calls))
        .unwrap();

    let expr = all([lo.eq(true), hi.eq(true)]);
    let evaluator = Evaluator::new();
    assert!(evaluator.evaluate(&message_session("x"), &expr, false).await.matched);
    assert_eq!(*log.lock().unwrap(), vec!["hi", "lo"]);
}

#[tokio::test]
async fn negate_law_holds() {
    let registry = FieldRegistry::new();
    let text = registry.register(text_field()).unwrap();
    let evaluator = Evaluator::new();

    for raw in ["yes", "no"] {
        let session = message_session(raw);
        let plain = evaluator.evaluate(&session, &text.eq("yes"), false).await.matched;
        let negated = evaluator.evaluate(&session, &text.ne("yes"), false).await.matched;
        assert_eq!(negated, !plain, "raw = {raw}");
    }
}

#[tokio::test]
async fn evaluation_is_idempotent() {
    let registry = FieldRegistry::new();
    let text = registry.register(text_field()).unwrap();
    let evaluator = Evaluator::new();
    let session = message_session("ping");
    let expr = all([text.eq("ping")]);

    let first = evaluator.evaluate(&session, &expr, false).await.matched;
    let second = evaluator.evaluate(&session, &expr, false).await.matched;
    assert!(first);
    assert_eq!(first, second);
}

#[tokio::test]
async fn disjunction_stops_at_first_true() {
    let registry = FieldRegistry::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let a = registry
        .register(recording_field("a", 0, Value::Bool(true), &log, &calls))
        .unwrap();
    let b = registry
        .register(recording_field("b", 0, Value::Bool(true), &log, &calls))
        .unwrap();

    let expr = any([a.eq(true), b.eq(true)]);
    let evaluator = Evaluator::new();
    assert!(evaluator.evaluate(&message_session("x"), &expr, false).await.matched);
    assert_eq!(*log.lock().unwrap(), vec!["a"]);
}

#[tokio::test]
async fn faulty_extractor_is_a_non_match() {
    let registry = FieldRegistry::new();
    let boom = registry
        .register(Field::from_fn("boom", |_| {
            Err(weld_engine::EvalError::Extractor {
                field: "boom".into(),
                reason: "backend unavailable".into(),
            })
        }))
        .unwrap();
    let evaluator = Evaluator::new();
    let result = evaluator.evaluate(&message_session("x"), &boom.eq(true), false).await;
    assert!(!result.matched);
}

// =============================================================================
// Caching
// =============================================================================

struct GlobalScope;

impl CachePolicy for GlobalScope {
    fn key(&self, _session: &Session) -> Option<Value> {
        Some(Value::Str("global".into()))
    }
}

#[tokio::test]
async fn cache_law_returns_stale_result_and_context() {
    let registry = FieldRegistry::new();
    let current = Arc::new(Mutex::new("hello".to_string()));
    let calls = Arc::new(AtomicUsize::new(0));

    let source = Arc::clone(&current);
    let count = Arc::clone(&calls);
    let mood = registry
        .register(
            Field::from_fn("mood", move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Str(source.lock().unwrap().clone()))
            })
            .cache(GlobalScope),
        )
        .unwrap();

    let evaluator = Evaluator::new();
    let session = message_session("x");
    let expr = mood.matches("(h)ello").unwrap();

    let first = evaluator.evaluate(&session, &expr, false).await;
    assert!(first.matched);
    assert_eq!(first.captures.as_ref().unwrap().group(1), Some("h"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // The underlying value changes; the cached verdict (and its captured
    // context) must be returned without re-running the extractor.
    *current.lock().unwrap() = "goodbye".to_string();
    let second = evaluator.evaluate(&session, &expr, false).await;
    assert!(second.matched);
    assert_eq!(second.captures.as_ref().unwrap().group(1), Some("h"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn override_shortcut_skips_extraction() {
    let registry = FieldRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&calls);
    let platform = registry
        .register(
            Field::from_fn("platform", move |s| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Str(s.event().platform.clone()))
            })
            .override_value("*", true),
        )
        .unwrap();

    let evaluator = Evaluator::new();
    let result = evaluator.evaluate(&message_session("x"), &platform.eq("*"), false).await;
    assert!(result.matched);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Pool lifecycle: one-shot and expiry
// =============================================================================

#[tokio::test]
async fn one_shot_entry_fires_exactly_once() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let (clock, _time) = test_clock(1_000);
    let engine = Engine::new(Arc::clone(&registry)).with_clock(clock);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_handler = Arc::clone(&fired);
    engine
        .on_message()
        .cond("once")
        .expiry(300)
        .handler(move || {
            let fired = Arc::clone(&fired_in_handler);
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert_eq!(engine.pool_len(EventCategory::Message), 1);
    assert_eq!(engine.dispatch(&message_session("once")).await, 1);
    // Removed the instant it fired.
    assert_eq!(engine.pool_len(EventCategory::Message), 0);
    assert_eq!(engine.dispatch(&message_session("once")).await, 0);
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_entry_is_removed_without_extraction() {
    let registry = Arc::new(FieldRegistry::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(
            recording_field("gate", 0, Value::Bool(true), &log, &calls)
                .categories([EventCategory::Message]),
        )
        .unwrap();

    let (clock, time) = test_clock(1_000);
    let engine = Engine::new(Arc::clone(&registry)).with_clock(clock);
    let gate = registry.resolve("gate").unwrap();
    let token = engine
        .on_message()
        .cond(gate.eq(true))
        .expiry(300)
        .handler(|| async {})
        .unwrap();

    time.store(1_301, Ordering::SeqCst);
    let verdict = engine.check(&message_session("x"), token).await;
    assert!(matches!(verdict, Verdict::Expired));
    assert_eq!(engine.pool_len(EventCategory::Message), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn scenario_d_expired_one_shot_skips_handler_and_shrinks_pool() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let (clock, time) = test_clock(10_000);
    let engine = Engine::new(Arc::clone(&registry)).with_clock(clock);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_handler = Arc::clone(&fired);
    engine
        .on_message()
        .cond("later")
        .expiry(300)
        .handler(move || {
            let fired = Arc::clone(&fired_in_handler);
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
    assert_eq!(engine.pool_len(EventCategory::Message), 1);

    time.store(10_301, Ordering::SeqCst);
    assert_eq!(engine.dispatch(&message_session("later")).await, 0);
    assert_eq!(engine.pool_len(EventCategory::Message), 0);
    tokio::task::yield_now().await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn absolute_expiry_input_is_taken_verbatim() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let (clock, time) = test_clock(1_999_999_000);
    let engine = Engine::new(Arc::clone(&registry)).with_clock(clock);

    let token = engine
        .on_message()
        .cond("x")
        .expiry(2_000_000_000)
        .handler(|| async {})
        .unwrap();

    // Still live just before the absolute deadline...
    assert!(matches!(
        engine.check(&message_session("y"), token).await,
        Verdict::NotMatched
    ));
    // ...and gone at it.
    time.store(2_000_000_000, Ordering::SeqCst);
    assert!(matches!(
        engine.check(&message_session("y"), token).await,
        Verdict::Expired
    ));
}

// =============================================================================
// Dispatch scenarios
// =============================================================================

#[tokio::test]
async fn scenario_a_prefixed_text_dispatches_with_stripped_message() {
    let registry = Arc::new(FieldRegistry::new());
    let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
    let engine = Engine::new(Arc::clone(&registry));

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine
        .on_message()
        .cond("hello")
        .cond(fields.prefix.eq(true))
        .handler(move |event: Arc<Event>| {
            let tx = tx.clone();
            async move {
                tx.send(event.as_message().unwrap().text.clone()).ok();
            }
        })
        .unwrap();

    assert_eq!(engine.dispatch(&message_session("/hello")).await, 1);
    let delivered = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(delivered, "hello");

    // Without the prefix, the prefix clause fails.
    assert_eq!(engine.dispatch(&message_session("hello")).await, 0);
}

#[tokio::test]
async fn scenario_b_command_prefix_publishes_parsed_args() {
    let registry = Arc::new(FieldRegistry::new());
    let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
    let engine = Engine::new(Arc::clone(&registry));

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine
        .on_message()
        .cond(fields.command.prefix_of(vec![
            TargetItem::text("ban"),
            TargetItem::schema(IntSchema),
        ]))
        .handler(move |args: CmdArgs| {
            let tx = tx.clone();
            async move {
                tx.send(args.0.clone()).ok();
            }
        })
        .unwrap();

    assert_eq!(engine.dispatch(&message_session("/ban 42")).await, 1);
    let args = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(args, vec![Value::Int(42)]);

    assert_eq!(engine.dispatch(&message_session("/ban soon")).await, 0);
}

struct DenyGate;

#[async_trait]
impl Gate for DenyGate {
    async fn allow(&self, _session: &Session) -> bool {
        false
    }
}

#[tokio::test]
async fn scenario_c_quota_default_clause_evaluates_last_and_blocks() {
    let registry = Arc::new(FieldRegistry::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));

    // Canonical text field, instrumented.
    {
        let log = Arc::clone(&log);
        let calls = Arc::clone(&calls);
        registry
            .register(
                Field::from_fn("text", move |session| {
                    log.lock().unwrap().push("content");
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(session
                        .event()
                        .as_message()
                        .map_or(Value::Null, |m| Value::Str(m.text.clone())))
                })
                .unique()
                .categories([EventCategory::Message]),
            )
            .unwrap();
    }
    // Rate limit: negative priority, so it runs after content checks.
    {
        let log = Arc::clone(&log);
        registry
            .register(
                Field::from_fn("limit", move |_| {
                    log.lock().unwrap().push("limit");
                    Ok(Value::Bool(false)) // over quota
                })
                .priority(-999)
                .categories([EventCategory::Message])
                .default_clause(|clause| clause.eq(true)),
            )
            .unwrap();
    }

    let engine = Engine::new(Arc::clone(&registry));
    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let hits = Arc::clone(&hits);
        engine
            .on_message()
            .cond("hit")
            .handler(move || {
                let hits = Arc::clone(&hits);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();
    }

    // Over-quota sender: neither handler fires; the limit clause is
    // evaluated after the content clause per the configured priorities.
    assert_eq!(engine.dispatch(&message_session("hit")).await, 0);
    tokio::task::yield_now().await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
    let order = log.lock().unwrap().clone();
    assert_eq!(order[..2], ["content", "limit"]);
}

#[tokio::test]
async fn failing_clause_does_not_block_sibling_handlers() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let boom = registry
        .register(Field::from_fn("boom", |_| {
            Err(weld_engine::EvalError::Extractor {
                field: "boom".into(),
                reason: "broken".into(),
            })
        }))
        .unwrap();

    let engine = Engine::new(Arc::clone(&registry));
    engine.on_message().cond(boom.eq(true)).handler(|| async {}).unwrap();
    let healthy = Arc::new(AtomicUsize::new(0));
    let healthy_in_handler = Arc::clone(&healthy);
    engine
        .on_message()
        .cond("hello")
        .handler(move || {
            let healthy = Arc::clone(&healthy_in_handler);
            async move {
                healthy.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();

    assert_eq!(engine.dispatch(&message_session("hello")).await, 1);
    tokio::task::yield_now().await;
    assert_eq!(healthy.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn newest_registration_is_evaluated_first() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let calls = Arc::new(AtomicUsize::new(0));
    let old_marker = registry
        .register(recording_field("old_marker", 0, Value::Bool(true), &log, &calls))
        .unwrap();
    let new_marker = registry
        .register(recording_field("new_marker", 0, Value::Bool(true), &log, &calls))
        .unwrap();

    let engine = Engine::new(Arc::clone(&registry));
    engine
        .on_message()
        .cond("x")
        .cond(old_marker.eq(true))
        .handler(|| async {})
        .unwrap();
    engine
        .on_message()
        .cond("x")
        .cond(new_marker.eq(true))
        .handler(|| async {})
        .unwrap();

    // Tail-to-head iteration: the later registration's condition is
    // evaluated before the earlier one's.
    assert_eq!(engine.dispatch(&message_session("x")).await, 2);
    assert_eq!(*log.lock().unwrap(), vec!["new_marker", "old_marker"]);
}

// =============================================================================
// Localization
// =============================================================================

#[tokio::test]
async fn pattern_map_resolves_language_and_localizer() {
    let registry = Arc::new(FieldRegistry::new());
    registry
        .register(Field::from_fn("greeting", |_| {
            let mut translations = BTreeMap::new();
            translations.insert("en".to_string(), "hello there".to_string());
            translations.insert("fr".to_string(), "bonjour toi".to_string());
            Ok(Value::Localized(translations))
        }))
        .unwrap();
    let greeting = registry.resolve("greeting").unwrap();

    let mut replies = BTreeMap::new();
    replies.insert("en".to_string(), "hi!".to_string());
    replies.insert("fr".to_string(), "salut !".to_string());
    let mut table = LocaleTable::new();
    table.insert("reply".to_string(), replies);

    let engine = Engine::new(Arc::clone(&registry))
        .with_localizer(Arc::new(MapLocalizer::new(table)));

    let (tx, mut rx) = mpsc::unbounded_channel();
    engine
        .on_message()
        .cond(greeting.matches_map([("fr", "bonjour (\\w+)"), ("en", "hello (\\w+)")]).unwrap())
        .handler(move |m: RegexMatch, loc: Localizer| {
            let tx = tx.clone();
            async move {
                tx.send((
                    m.group(1).map(str::to_string),
                    loc.lang().map(str::to_string),
                    loc.text("reply").map(str::to_string),
                ))
                .ok();
            }
        })
        .unwrap();

    assert_eq!(engine.dispatch(&message_session("anything")).await, 1);
    let (capture, lang, reply) = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(capture.as_deref(), Some("toi"));
    assert_eq!(lang.as_deref(), Some("fr"));
    assert_eq!(reply.as_deref(), Some("salut !"));
}

// =============================================================================
// Ad hoc evaluation
// =============================================================================

#[tokio::test]
async fn compile_and_evaluate_outside_registration() {
    let registry = Arc::new(FieldRegistry::new());
    registry.register(text_field()).unwrap();
    let engine = Engine::new(Arc::clone(&registry));

    let expr = engine
        .compile(EventCategory::Message, vec!["ping".into()])
        .unwrap();
    assert!(engine.evaluate(&message_session("ping"), &expr).await.matched);
    assert!(!engine.evaluate(&message_session("pong"), &expr).await.matched);
}
