//! Approval engine (spec.md §4.7, C8): evaluates a conjunction of
//! free-form natural-language rules against a candidate answer before it is
//! released to a peer.
//!
//! Grounded on `ailee-trust-layer/src/trust.rs`'s pattern of scoring a
//! candidate against an ordered list of criteria and returning on the first
//! failure.

use dk_llm::{LlmProvider, Message};

/// spec.md §3 `ApprovalRule`: a free-form sentence treated as a predicate.
#[derive(Debug, Clone)]
pub struct ApprovalRule {
    pub text: String,
}

impl ApprovalRule {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    AutoAccepted,
    AutoRejected { reason: String },
    Pending,
}

/// Evaluate `rules` against `(question, answer, context)`. Short-circuits on
/// the first rule the LLM judges `no`. An empty rule set or any LLM failure
/// both yield `Pending`, per spec.md §4.7 and §7.
pub async fn evaluate(
    llm: &dyn LlmProvider,
    question: &str,
    answer: &str,
    context: &str,
    rules: &[ApprovalRule],
) -> ApprovalDecision {
    if rules.is_empty() {
        return ApprovalDecision::Pending;
    }

    for rule in rules {
        match evaluate_rule(llm, question, answer, context, rule).await {
            Ok(true) => continue,
            Ok(false) => {
                tracing::info!(rule = %rule.text, "approval rule rejected candidate answer");
                return ApprovalDecision::AutoRejected {
                    reason: rule.text.clone(),
                };
            }
            Err(err) => {
                tracing::warn!(rule = %rule.text, error = %err, "approval rule evaluation failed, leaving pending");
                return ApprovalDecision::Pending;
            }
        }
    }

    ApprovalDecision::AutoAccepted
}

async fn evaluate_rule(
    llm: &dyn LlmProvider,
    question: &str,
    answer: &str,
    context: &str,
    rule: &ApprovalRule,
) -> anyhow::Result<bool> {
    let prompt = vec![
        Message::system(
            "You are an approval gate for an automated answer. Given a rule, a question, \
             a candidate answer, and supporting context, reply with exactly one word: \
             'yes' if the answer satisfies the rule, 'no' otherwise.",
        ),
        Message::user(format!(
            "Rule: {rule}\n\nQuestion: {question}\n\nCandidate answer: {answer}\n\nContext:\n{context}",
            rule = rule.text
        )),
    ];

    let completion = llm
        .complete(&prompt)
        .await
        .map_err(|e| anyhow::anyhow!("LLM call failed: {e}"))?;

    let verdict = completion.text.trim().to_lowercase();
    Ok(verdict.starts_with("yes"))
}
