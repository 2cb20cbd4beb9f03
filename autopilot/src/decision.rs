//! Decision engine - maps an analysis and time context to an action.
//!
//! Rules are evaluated in order and the first match wins. The standard table
//! covers quiet hours, buying signals, explicit intents and funnel stage, and
//! falls through to a free-form AI reply.

use tracing::trace;

use crate::types::{Action, Analysis, Intent, Sentiment, Stage};

/// Quiet hours: after 22:00 and before 07:00 local time.
pub fn is_night(hour: u32) -> bool {
    hour > 22 || hour < 7
}

/// Inputs a rule can look at.
#[derive(Debug, Clone, Copy)]
pub struct DecisionContext<'a> {
    pub analysis: &'a Analysis,
    pub hour: u32,
    pub is_optimal_time: bool,
}

/// Condition for rule matching.
#[derive(Debug, Clone)]
pub enum RuleCondition {
    Night,
    BuyingSignal,
    OptimalTime,
    Intent(Intent),
    Stage(Stage),
    Sentiment(Sentiment),
    Not(Box<RuleCondition>),
    And(Vec<RuleCondition>),
}

impl RuleCondition {
    pub fn evaluate(&self, ctx: &DecisionContext<'_>) -> bool {
        match self {
            RuleCondition::Night => is_night(ctx.hour),
            RuleCondition::BuyingSignal => ctx.analysis.buying_signal,
            RuleCondition::OptimalTime => ctx.is_optimal_time,
            RuleCondition::Intent(intent) => ctx.analysis.intent == *intent,
            RuleCondition::Stage(stage) => ctx.analysis.stage == *stage,
            RuleCondition::Sentiment(sentiment) => ctx.analysis.sentiment == *sentiment,
            RuleCondition::Not(inner) => !inner.evaluate(ctx),
            RuleCondition::And(conditions) => conditions.iter().all(|c| c.evaluate(ctx)),
        }
    }
}

/// A rule in the decision table.
#[derive(Debug, Clone)]
pub struct Rule {
    pub name: &'static str,
    pub condition: RuleCondition,
    pub action: Action,
}

impl Rule {
    fn new(name: &'static str, condition: RuleCondition, action: Action) -> Self {
        Self {
            name,
            condition,
            action,
        }
    }
}

/// Ordered rule table with a fallback action.
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    rules: Vec<Rule>,
    fallback: Action,
}

impl Default for DecisionEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl DecisionEngine {
    /// The standard outreach table.
    pub fn standard() -> Self {
        use RuleCondition as C;

        let rules = vec![
            Rule::new("night_buying", C::And(vec![C::Night, C::BuyingSignal]), Action::SoftCloseNight),
            Rule::new("night", C::Night, Action::AutoReplyNight),
            Rule::new(
                "buying_optimal",
                C::And(vec![C::BuyingSignal, C::OptimalTime]),
                Action::SendOffer,
            ),
            Rule::new("buying", C::BuyingSignal, Action::SendOfferSoft),
            Rule::new("price", C::Intent(Intent::QuestionPrice), Action::SendPrice),
            Rule::new("scheduling", C::Intent(Intent::Scheduling), Action::SendCalendar),
            Rule::new("complaint", C::Intent(Intent::Complaint), Action::HandoverHuman),
            Rule::new("objection", C::Intent(Intent::Objection), Action::HandleObjection),
            Rule::new("new_lead", C::Stage(Stage::New), Action::Qualify),
            Rule::new(
                "closing_upsell",
                C::And(vec![
                    C::Stage(Stage::Closing),
                    C::Sentiment(Sentiment::Positive),
                    C::Not(Box::new(C::BuyingSignal)),
                ]),
                Action::TryUpsell,
            ),
            Rule::new("closing", C::Stage(Stage::Closing), Action::SendCta),
        ];

        Self {
            rules,
            fallback: Action::AiChat,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// First matching rule's action, else the fallback.
    pub fn decide(&self, analysis: &Analysis, hour: u32, is_optimal_time: bool) -> Action {
        let ctx = DecisionContext {
            analysis,
            hour,
            is_optimal_time,
        };
        match self.rules.iter().find(|rule| rule.condition.evaluate(&ctx)) {
            Some(rule) => {
                trace!(rule = rule.name, action = %rule.action, "Rule matched");
                rule.action
            }
            None => self.fallback,
        }
    }
}

/// Decide with the standard table.
pub fn decide(analysis: &Analysis, hour: u32, is_optimal_time: bool) -> Action {
    DecisionEngine::standard().decide(analysis, hour, is_optimal_time)
}
