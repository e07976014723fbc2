//! The standard field set.
//!
//! [`StandardFields::install`] registers the extraction points the
//! registration surface leans on: the canonical literal targets (`text`,
//! `event_type`, `sub_type`), command tokens with their remap policy, and
//! the cross-cutting policy fields (`blocked`, `limit`, `is_admin`) whose
//! default clauses apply uniformly to every handler that does not mention
//! them. Returns a struct of clause handles, so conditions are written
//! against fields resolved once at startup.
//!
//! Policy decisions themselves (block lists, quotas) live behind the
//! narrow [`Gate`] and [`AdminProbe`] interfaces; permissive defaults keep
//! small bots configuration-free.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use weld_core::{ApiError, EventCategory, Session, Value, shell_split};

use crate::builder::{CANON_EVENT_TYPE, CANON_SUB_TYPE, CANON_TEXT};
use crate::error::{EvalError, RegistryError};
use crate::expr::{Operand, Operator, TargetItem};
use crate::field::{CachePolicy, Field, FieldClause, FieldExtractor, OperandRemap};
use crate::registry::FieldRegistry;

/// A yes/no policy consulted during evaluation (block lists, quotas).
#[async_trait]
pub trait Gate: Send + Sync {
    async fn allow(&self, session: &Session) -> bool;
}

/// Permits everything.
pub struct OpenGate;

#[async_trait]
impl Gate for OpenGate {
    async fn allow(&self, _session: &Session) -> bool {
        true
    }
}

/// Answers "is the sender a group admin".
#[async_trait]
pub trait AdminProbe: Send + Sync {
    async fn is_admin(&self, session: &Session) -> Result<bool, ApiError>;
}

/// Probe that asks the bot API for the sender's group role.
pub struct ApiAdminProbe {
    /// The platform action queried; expects a `role` string in the reply.
    pub action: String,
}

impl Default for ApiAdminProbe {
    fn default() -> Self {
        Self {
            action: "get_group_member_info".to_string(),
        }
    }
}

#[async_trait]
impl AdminProbe for ApiAdminProbe {
    async fn is_admin(&self, session: &Session) -> Result<bool, ApiError> {
        let event = session.event();
        let (Some(group_id), Some(user_id)) = (event.group_id(), event.user_id()) else {
            return Ok(false);
        };
        let reply = session
            .api()
            .call_api(&self.action, json!({ "group_id": group_id, "user_id": user_id }))
            .await?;
        Ok(reply
            .get("role")
            .and_then(|role| role.as_str())
            .is_some_and(|role| role == "admin" || role == "owner"))
    }
}

/// Wiring for the policy-backed standard fields.
pub struct StandardConfig {
    /// Block-list check; `allow == false` means the sender is blocked.
    pub block_gate: Arc<dyn Gate>,
    /// Rate-limit check; `allow == false` means the sender is over quota.
    pub quota_gate: Arc<dyn Gate>,
    pub admin_probe: Arc<dyn AdminProbe>,
}

impl Default for StandardConfig {
    fn default() -> Self {
        Self {
            block_gate: Arc::new(OpenGate),
            quota_gate: Arc::new(OpenGate),
            admin_probe: Arc::new(ApiAdminProbe::default()),
        }
    }
}

struct GateExtractor {
    gate: Arc<dyn Gate>,
    /// `true` for fields whose value is "the gate said no" (block list).
    invert: bool,
}

#[async_trait]
impl FieldExtractor for GateExtractor {
    async fn extract(&self, session: &Session) -> Result<Value, EvalError> {
        let allowed = self.gate.allow(session).await;
        Ok(Value::Bool(allowed != self.invert))
    }
}

struct AdminExtractor {
    probe: Arc<dyn AdminProbe>,
}

#[async_trait]
impl FieldExtractor for AdminExtractor {
    async fn extract(&self, session: &Session) -> Result<Value, EvalError> {
        Ok(Value::Bool(self.probe.is_admin(session).await?))
    }
}

/// Caches per sender: block-list answers are stable within a sender.
pub struct PerUserCache;

impl CachePolicy for PerUserCache {
    fn key(&self, session: &Session) -> Option<Value> {
        session.event().user_id().map(|user| Value::Str(user.to_string()))
    }
}

/// Rewrites naive command equality into the intended check: a schema
/// right-hand side becomes a singleton match.
struct CommandRemap;

impl OperandRemap for CommandRemap {
    fn remap(&self, op: Operator, rhs: Operand) -> (Operator, Operand) {
        match rhs {
            Operand::Schema(s) => (Operator::SingletonOf, Operand::Schema(s)),
            other => (op, other),
        }
    }
}

/// Lowers command literals into target sequences: strings are
/// shell-split, lists map element-wise.
fn command_rhs(value: Value) -> Operand {
    match value {
        Value::Str(s) => Operand::Target(Arc::new(
            shell_split(&s).into_iter().map(TargetItem::Text).collect(),
        )),
        Value::Tokens(tokens) => {
            Operand::Target(Arc::new(tokens.into_iter().map(TargetItem::Text).collect()))
        }
        Value::List(items) => Operand::Target(Arc::new(
            items
                .into_iter()
                .map(|item| match item {
                    Value::Str(s) => TargetItem::Text(s),
                    other => TargetItem::Text(other.to_string()),
                })
                .collect(),
        )),
        other => Operand::Value(other),
    }
}

/// Clause handles for the standard fields, resolved once at startup.
pub struct StandardFields {
    pub text: FieldClause,
    pub raw_text: FieldClause,
    pub command: FieldClause,
    pub prefix: FieldClause,
    pub event_type: FieldClause,
    pub sub_type: FieldClause,
    pub platform: FieldClause,
    pub bot_id: FieldClause,
    pub user_id: FieldClause,
    pub group_id: FieldClause,
    pub to_me: FieldClause,
    pub is_admin: FieldClause,
    pub blocked: FieldClause,
    pub limit: FieldClause,
}

impl StandardFields {
    /// Registers the standard fields and the `message` alias for `text`.
    pub fn install(
        registry: &FieldRegistry,
        config: StandardConfig,
    ) -> Result<Self, RegistryError> {
        let text = registry.register(
            Field::from_fn(CANON_TEXT, |s| {
                Ok(s.event()
                    .as_message()
                    .map_or(Value::Null, |m| Value::Str(m.text.clone())))
            })
            .unique()
            .categories([EventCategory::Message]),
        )?;
        registry.alias("message", CANON_TEXT)?;

        let raw_text = registry.register(
            Field::from_fn("raw_text", |s| {
                Ok(s.event()
                    .as_message()
                    .map_or(Value::Null, |m| Value::Str(m.raw_text.clone())))
            })
            .categories([EventCategory::Message]),
        )?;

        let command = registry.register(
            Field::from_fn("command", |s| {
                Ok(s.event()
                    .as_message()
                    .map_or(Value::Null, |m| Value::Tokens(m.tokens.clone())))
            })
            .unique()
            .categories([EventCategory::Message])
            .rhs_converter(command_rhs)
            .remap(CommandRemap),
        )?;

        // Cheap gate: checked before content clauses.
        let prefix = registry.register(
            Field::from_fn("prefix", |s| {
                Ok(s.event()
                    .as_message()
                    .map_or(Value::Bool(false), |m| Value::Bool(m.prefix_present)))
            })
            .priority(50)
            .categories([EventCategory::Message]),
        )?;

        let event_type = registry.register(
            Field::from_fn(CANON_EVENT_TYPE, |s| {
                Ok(Value::Str(s.event().event_type.clone()))
            })
            .unique(),
        )?;

        let sub_type = registry.register(
            Field::from_fn(CANON_SUB_TYPE, |s| Ok(Value::Str(s.event().sub_type.clone())))
                .unique(),
        )?;

        // "*" is the wildcard spelling: constant true, no extraction.
        let platform = registry.register(
            Field::from_fn("platform", |s| Ok(Value::Str(s.event().platform.clone())))
                .override_value("*", true),
        )?;

        let bot_id = registry.register(
            Field::from_fn("bot_id", |s| Ok(Value::Str(s.event().bot_id.clone())))
                .override_value("*", true),
        )?;

        let user_id = registry.register(Field::from_fn("user_id", |s| {
            Ok(Value::from(s.event().user_id().map(str::to_string)))
        }))?;

        let group_id = registry.register(Field::from_fn("group_id", |s| {
            Ok(Value::from(s.event().group_id().map(str::to_string)))
        }))?;

        let to_me = registry.register(
            Field::from_fn("to_me", |s| {
                Ok(s.event()
                    .as_message()
                    .map_or(Value::Bool(false), |m| Value::Bool(m.to_me)))
            })
            .categories([EventCategory::Message]),
        )?;

        let is_admin = registry.register(
            Field::new(
                "is_admin",
                AdminExtractor {
                    probe: Arc::clone(&config.admin_probe),
                },
            )
            .priority(10),
        )?;

        let blocked = registry.register(
            Field::new(
                "blocked",
                GateExtractor {
                    gate: Arc::clone(&config.block_gate),
                    invert: true,
                },
            )
            .priority(100)
            .categories([EventCategory::Message, EventCategory::Request])
            .cache(PerUserCache)
            .default_clause(|clause| clause.eq(false)),
        )?;

        // Deliberately last: content checks run before the quota is spent.
        let limit = registry.register(
            Field::new(
                "limit",
                GateExtractor {
                    gate: Arc::clone(&config.quota_gate),
                    invert: false,
                },
            )
            .priority(-999)
            .categories([EventCategory::Message])
            .default_clause(|clause| clause.eq(true)),
        )?;

        Ok(Self {
            text,
            raw_text,
            command,
            prefix,
            event_type,
            sub_type,
            platform,
            bot_id,
            user_id,
            group_id,
            to_me,
            is_admin,
            blocked,
            limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use weld_core::{ApiResult, BotApi, Event, MessagePayload};

    use crate::eval::Evaluator;
    use crate::expr::all;

    struct NullApi;

    #[async_trait]
    impl BotApi for NullApi {
        fn id(&self) -> &str {
            "b1"
        }

        async fn call_api(
            &self,
            _action: &str,
            _params: serde_json::Value,
        ) -> ApiResult<serde_json::Value> {
            Err(ApiError::NotConnected)
        }
    }

    struct RoleApi(&'static str);

    #[async_trait]
    impl BotApi for RoleApi {
        fn id(&self) -> &str {
            "b1"
        }

        async fn call_api(
            &self,
            action: &str,
            _params: serde_json::Value,
        ) -> ApiResult<serde_json::Value> {
            assert_eq!(action, "get_group_member_info");
            Ok(json!({ "role": self.0 }))
        }
    }

    struct DenyGate;

    #[async_trait]
    impl Gate for DenyGate {
        async fn allow(&self, _session: &Session) -> bool {
            false
        }
    }

    fn group_session(api: Arc<dyn BotApi>, text: &str) -> Session {
        let event = Event::message(
            "onebot",
            "b1",
            MessagePayload::from_raw("u1", Some("g1".into()), text, &["/".into()]),
        );
        Session::new(Arc::new(event), api)
    }

    #[tokio::test]
    async fn install_registers_expected_names() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
        assert!(registry.contains("text"));
        assert!(registry.contains("command"));
        assert!(registry.contains("limit"));
        // Alias resolves to the same underlying field.
        assert!(registry.resolve("message").unwrap().same_field(&fields.text));
    }

    #[tokio::test]
    async fn prefix_and_text_describe_stripped_message() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
        let session = group_session(Arc::new(NullApi), "/echo hi");

        let evaluator = Evaluator::new();
        let expr = all([fields.prefix.eq(true), fields.text.eq("echo hi")]);
        assert!(evaluator.evaluate(&session, &expr, false).await.matched);
    }

    #[tokio::test]
    async fn platform_wildcard_short_circuits() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
        let session = group_session(Arc::new(NullApi), "hi");

        let evaluator = Evaluator::new();
        let wildcard = fields.platform.eq("*");
        assert!(evaluator.evaluate(&session, &wildcard, false).await.matched);
        let other = fields.platform.eq("discord");
        assert!(!evaluator.evaluate(&session, &other, false).await.matched);
    }

    #[tokio::test]
    async fn blocked_gate_controls_field_value() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(
            &registry,
            StandardConfig {
                block_gate: Arc::new(DenyGate),
                ..StandardConfig::default()
            },
        )
        .unwrap();
        let session = group_session(Arc::new(NullApi), "hi");

        let evaluator = Evaluator::new();
        assert!(evaluator.evaluate(&session, &fields.blocked.eq(true), false).await.matched);
    }

    #[tokio::test]
    async fn admin_probe_reads_role() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
        let evaluator = Evaluator::new();

        let admin = group_session(Arc::new(RoleApi("admin")), "hi");
        assert!(evaluator.evaluate(&admin, &fields.is_admin.eq(true), false).await.matched);

        let member = group_session(Arc::new(RoleApi("member")), "hi");
        assert!(!evaluator.evaluate(&member, &fields.is_admin.eq(true), false).await.matched);
    }

    #[tokio::test]
    async fn failing_api_is_contained_as_non_match() {
        let registry = FieldRegistry::new();
        let fields = StandardFields::install(&registry, StandardConfig::default()).unwrap();
        let evaluator = Evaluator::new();

        // NullApi errors; the fault barrier reports a non-match.
        let session = group_session(Arc::new(NullApi), "hi");
        assert!(!evaluator.evaluate(&session, &fields.is_admin.eq(true), false).await.matched);
    }
}
