use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit::{DecisionKind, DecisionRecord, DecisionRecorder};
use crate::capabilities::YesNoClassifier;
use crate::domain::conversation::ConversationId;
use crate::vocabulary::matching_tokens;

const AFFIRMATIVE_TOKENS: &[&str] = &["yes", "sim", "y"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FewShotExample {
    pub message: String,
    pub awaiting_quote: bool,
}

fn example(message: &str, awaiting_quote: bool) -> FewShotExample {
    FewShotExample { message: message.to_string(), awaiting_quote }
}

pub fn default_few_shot_examples() -> Vec<FewShotExample> {
    vec![
        example("Oi, ainda estou aguardando o orçamento do pendente", true),
        example("Conseguiu ver o preço daquela arandela que te mandei?", true),
        example("Me manda o valor do lustre quando puder, preciso fechar hoje", true),
        example("Tá bom, obrigado!", false),
        example("Qual o endereço da loja?", false),
        example("Recebi o orçamento, vou analisar e te retorno", false),
    ]
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticAnswer {
    Affirmative,
    Negative,
    Unavailable,
    /// The keyword gate already failed, so the classifier was not consulted.
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVerdict {
    pub keyword_matches: Vec<String>,
    pub semantic: SemanticAnswer,
    pub awaiting_quote: bool,
    pub rationale: String,
}

#[derive(Clone, Debug)]
pub struct IntentContext<'a> {
    pub conversation_id: &'a ConversationId,
    pub agent: &'a str,
    pub client_name: &'a str,
    pub recent_text: &'a str,
}

/// Keyword heuristic AND semantic yes/no classification.
pub struct IntentGate {
    keywords: Vec<String>,
    examples: Vec<FewShotExample>,
    classifier: Arc<dyn YesNoClassifier>,
    recorder: Arc<dyn DecisionRecorder>,
    classifier_timeout: Duration,
}

impl IntentGate {
    pub fn new(
        keywords: Vec<String>,
        classifier: Arc<dyn YesNoClassifier>,
        recorder: Arc<dyn DecisionRecorder>,
        classifier_timeout: Duration,
    ) -> Self {
        Self {
            keywords,
            examples: default_few_shot_examples(),
            classifier,
            recorder,
            classifier_timeout,
        }
    }

    /// Boolean form keyed by client name alone.
    pub async fn is_awaiting_quote(&self, client_name: &str, recent_text: &str) -> bool {
        let conversation_id = ConversationId::from_client_name(client_name);
        self.evaluate(&IntentContext {
            conversation_id: &conversation_id,
            agent: "unassigned",
            client_name,
            recent_text,
        })
        .await
        .awaiting_quote
    }

    pub async fn evaluate(&self, context: &IntentContext<'_>) -> IntentVerdict {
        let folded = context.recent_text.to_lowercase();
        let keyword_matches = matching_tokens(&folded, &self.keywords);

        let semantic = if keyword_matches.is_empty() {
            SemanticAnswer::Skipped
        } else {
            self.classify(context).await
        };

        let awaiting_quote =
            !keyword_matches.is_empty() && semantic == SemanticAnswer::Affirmative;
        let rationale = match (keyword_matches.is_empty(), semantic) {
            (true, _) => "keyword gate failed: no pricing vocabulary in message".to_string(),
            (false, SemanticAnswer::Affirmative) => format!(
                "keyword gate matched {:?} and classifier confirmed the client is waiting",
                keyword_matches
            ),
            (false, SemanticAnswer::Unavailable) => format!(
                "keyword gate matched {:?} but classifier was unavailable; treated as no",
                keyword_matches
            ),
            (false, _) => format!(
                "keyword gate matched {:?} but classifier answered no",
                keyword_matches
            ),
        };

        tracing::debug!(
            event_name = "intent.evaluated",
            conversation_id = %context.conversation_id,
            agent = context.agent,
            awaiting_quote,
            semantic = ?semantic,
            "intent gate evaluated"
        );

        self.recorder
            .record(
                DecisionRecord::new(
                    context.conversation_id.clone(),
                    context.agent,
                    if awaiting_quote { "intent.awaiting_quote" } else { "intent.not_awaiting" },
                    DecisionKind::IntentEvaluated,
                    context.recent_text,
                    rationale.clone(),
                )
                .with_extra("client_name", context.client_name)
                .with_extra("keyword_matches", keyword_matches.join(","))
                .with_extra("semantic", format!("{semantic:?}")),
            )
            .await;

        IntentVerdict { keyword_matches, semantic, awaiting_quote, rationale }
    }

    async fn classify(&self, context: &IntentContext<'_>) -> SemanticAnswer {
        let prompt = build_prompt(&self.examples, context.client_name, context.recent_text);
        match tokio::time::timeout(self.classifier_timeout, self.classifier.classify(&prompt)).await
        {
            Ok(Ok(answer)) if is_affirmative(&answer) => SemanticAnswer::Affirmative,
            Ok(Ok(_)) => SemanticAnswer::Negative,
            Ok(Err(error)) => {
                tracing::warn!(
                    event_name = "intent.classifier_unavailable",
                    conversation_id = %context.conversation_id,
                    error = %error,
                    "classifier failed; treating as no"
                );
                SemanticAnswer::Unavailable
            }
            Err(_) => {
                tracing::warn!(
                    event_name = "intent.classifier_timeout",
                    conversation_id = %context.conversation_id,
                    timeout_ms = self.classifier_timeout.as_millis() as u64,
                    "classifier timed out; treating as no"
                );
                SemanticAnswer::Unavailable
            }
        }
    }
}

pub fn is_affirmative(answer: &str) -> bool {
    answer
        .to_lowercase()
        .split(|ch: char| !ch.is_alphanumeric())
        .any(|token| AFFIRMATIVE_TOKENS.contains(&token))
}

pub fn build_prompt(examples: &[FewShotExample], client_name: &str, recent_text: &str) -> String {
    let mut prompt = String::from(
        "You review customer messages sent to a lighting store's sales team.\n\
         Decide whether the customer is following up because they are still waiting \
         for a price quote. Courtesy replies, thanks and unrelated questions are not.\n\
         Answer strictly \"yes\" or \"no\".\n\n",
    );
    for example in examples {
        prompt.push_str(&format!(
            "Message: {}\nAnswer: {}\n\n",
            example.message,
            if example.awaiting_quote { "yes" } else { "no" }
        ));
    }
    prompt.push_str(&format!("Customer: {client_name}\nMessage: {recent_text}\nAnswer:"));
    prompt
}
