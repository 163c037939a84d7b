//! CoachAgent — per-session conversation state machine.
//!
//! One actor per session. Each `RunTurn` message runs a full turn through a
//! sequential pipeline: find the question, retrieve grounding context, draft
//! a grounded reply, compose the final prompt, and stream the answer back to
//! the caller. Distinct sessions are distinct actors, so turns never share
//! in-flight state.
//!
//! Retrieval failures degrade the turn to an ungrounded answer. Only a
//! language-model failure is fatal: the turn errors and no assistant message
//! is committed.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tokio::sync::mpsc;

use shared_types::{Message, RecommendationMap, TurnEvent, TurnResult};

use crate::llm::{LanguageModel, PromptMessage};
use crate::retrieval::Retriever;

pub struct CoachAgent;

#[derive(Clone)]
pub struct CoachAgentArguments {
    pub agent_id: String,
    pub retriever: Arc<Retriever>,
    pub llm: Arc<dyn LanguageModel>,
}

pub struct CoachAgentState {
    agent_id: String,
    retriever: Arc<Retriever>,
    llm: Arc<dyn LanguageModel>,
}

#[derive(Debug)]
pub enum CoachAgentMsg {
    /// Run one conversation turn over the caller-owned history.
    ///
    /// `progress_tx` receives the answer fragments and recommendation
    /// updates as they happen; `reply` gets the consolidated result.
    RunTurn {
        history: Vec<Message>,
        progress_tx: Option<mpsc::UnboundedSender<TurnEvent>>,
        reply: RpcReplyPort<Result<TurnResult, AgentError>>,
    },
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum AgentError {
    #[error("language model unavailable: {0}")]
    Generation(String),
}

// ============================================================================
// Actor implementation
// ============================================================================

#[async_trait]
impl Actor for CoachAgent {
    type Msg = CoachAgentMsg;
    type State = CoachAgentState;
    type Arguments = CoachAgentArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(agent_id = %args.agent_id, "CoachAgent starting");
        Ok(CoachAgentState {
            agent_id: args.agent_id,
            retriever: args.retriever,
            llm: args.llm,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            CoachAgentMsg::RunTurn {
                history,
                progress_tx,
                reply,
            } => {
                let result = Self::run_turn(state, history, progress_tx).await;
                if let Err(e) = &result {
                    tracing::error!(agent_id = %state.agent_id, error = %e, "turn failed");
                }
                let _ = reply.send(result);
            }
        }
        Ok(())
    }
}

// ============================================================================
// Turn pipeline
// ============================================================================

impl CoachAgent {
    async fn run_turn(
        state: &CoachAgentState,
        history: Vec<Message>,
        progress_tx: Option<mpsc::UnboundedSender<TurnEvent>>,
    ) -> Result<TurnResult, AgentError> {
        let started = Instant::now();

        // Deciding: the most recent user message is the question. Without
        // one there is nothing to answer — the turn is a no-op.
        let Some(question) = last_user_content(&history).map(str::to_string) else {
            tracing::debug!(agent_id = %state.agent_id, "no user message in history; empty turn");
            return Ok(TurnResult {
                message: None,
                recommendations: RecommendationMap::new(),
                elapsed_ms: elapsed_ms(started),
            });
        };

        // Retrieving, folded into the grounding call: always retrieve, then
        // let the model answer conditioned on the context. Retrieval failure
        // means an ungrounded answer, never a failed turn.
        let (context, recommendations) = match state.retriever.retrieve(&question).await {
            Ok(retrieved) => retrieved,
            Err(e) => {
                tracing::warn!(
                    agent_id = %state.agent_id,
                    error = %e,
                    "retrieval unavailable; answering without context"
                );
                (String::new(), RecommendationMap::new())
            }
        };

        let grounding = grounding_prompt(&context, &question);
        let draft = state
            .llm
            .generate(&[PromptMessage::user(grounding)])
            .await
            .map_err(|e| AgentError::Generation(e.to_string()))?;

        let mut turn_messages = history;
        turn_messages.push(Message::tool_result(draft, recommendations));

        // Composing: fold every tool result produced since the question into
        // the system instruction, then prompt with the filtered history.
        let (docs_content, recommendations) = collect_tool_results(&turn_messages);
        let mut prompt = vec![PromptMessage::system(compose_system_prompt(&docs_content))];
        prompt.extend(filtered_history(&turn_messages));

        let mut fragments = state
            .llm
            .generate_stream(&prompt)
            .await
            .map_err(|e| AgentError::Generation(e.to_string()))?;

        // Recommendations are final at this point; surface them without
        // waiting for the text. Sends are fire-and-forget — an abandoned
        // caller must not stall the turn.
        if let Some(tx) = &progress_tx {
            let _ = tx.send(TurnEvent::Recommendations {
                recommendations: recommendations.clone(),
            });
        }

        let mut answer = String::new();
        while let Some(item) = fragments.recv().await {
            let fragment = item.map_err(|e| AgentError::Generation(e.to_string()))?;
            answer.push_str(&fragment);
            if let Some(tx) = &progress_tx {
                let _ = tx.send(TurnEvent::Fragment { text: fragment });
            }
        }

        let message = Message::assistant(answer.trim().to_string());
        tracing::info!(
            agent_id = %state.agent_id,
            recommendations = recommendations.len(),
            elapsed_ms = elapsed_ms(started),
            "turn completed"
        );

        Ok(TurnResult {
            message: Some(message),
            recommendations,
            elapsed_ms: elapsed_ms(started),
        })
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Most recent user message content, scanning from the end backward.
fn last_user_content(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.is_user())
        .map(Message::content)
}

/// Index just past the most recent user message (0 when there is none).
fn after_last_user(messages: &[Message]) -> usize {
    messages
        .iter()
        .rposition(Message::is_user)
        .map(|i| i + 1)
        .unwrap_or(0)
}

/// Concatenate the tool results produced since the last user message and
/// union their artifacts. Later entries win on id collision.
fn collect_tool_results(messages: &[Message]) -> (String, RecommendationMap) {
    let mut docs_content = String::new();
    let mut merged = RecommendationMap::new();

    for message in &messages[after_last_user(messages)..] {
        if let Message::ToolResult { content, artifact } = message {
            docs_content.push_str(content);
            merged.extend(artifact.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    (docs_content, merged)
}

/// Keep user and system messages plus assistant messages that did not defer
/// to tooling. Grounding-only intermediates never reach the final prompt.
fn filtered_history(messages: &[Message]) -> Vec<PromptMessage> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::User { content } => Some(PromptMessage::user(content.clone())),
            Message::System { content } => Some(PromptMessage::system(content.clone())),
            Message::Assistant {
                content,
                requested_tools,
            } if requested_tools.is_empty() => Some(PromptMessage::assistant(content.clone())),
            _ => None,
        })
        .collect()
}

fn grounding_prompt(context: &str, question: &str) -> String {
    format!(
        r#"Tu es un coach sportif professionnel francophone spécialisé dans l'accompagnement des débutants.
Réponds à la question de l'utilisateur en te basant sur le contexte suivant :

{context}

Question : {question}"#
    )
}

fn compose_system_prompt(docs_content: &str) -> String {
    format!(
        r#"Tu es un coach sportif professionnel francophone spécialisé dans l'accompagnement des débutants. Tu fournis des conseils basés sur des preuves scientifiques concernant :
- Les exercices adaptés aux différents objectifs (prise de muscle, perte de poids, souplesse)
- La nutrition, incluant la planification des repas et la supplémentation
- La prévention des blessures et la sécurité pendant l'entraînement

PRINCIPES DE RÉPONSE :
- Réponds TOUJOURS en français, de manière claire et accessible
- Utilise un ton encourageant et bienveillant
- Base tes réponses sur le contexte fourni
- Évite le jargon technique complexe
- Décompose les concepts en étapes simples
- Insiste sur la bonne forme et la technique
- Inclus des avertissements de sécurité pertinents
- Fournis des recommandations actionnables

STRUCTURE DE RÉPONSE :
1. Réponds directement à la question
2. Appuie-toi sur des références spécifiques du contexte
3. Fournis des étapes pratiques d'implémentation
4. Inclus les considérations de sécurité
5. Termine avec des recommandations claires

LIMITES :
- Ne fournis que des conseils basés sur le contexte disponible
- Distingue clairement les principes généraux des recommandations spécifiques
- Si un conseil médical est nécessaire, redirige vers un professionnel de santé
- Reconnais quand une question dépasse le contexte fourni

CONTEXTE DE LA BASE DE CONNAISSANCES :
{docs_content}"#
    )
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::{Recommendation, ToolRequest};

    fn recommendation(id: &str, title: &str) -> Recommendation {
        Recommendation {
            id: id.to_string(),
            title: title.to_string(),
            video_url: format!("https://youtube.com/watch?v={id}"),
            thumbnail_url: String::new(),
        }
    }

    #[test]
    fn test_last_user_content_scans_backward() {
        let history = vec![
            Message::user("première question"),
            Message::assistant("première réponse"),
            Message::user("deuxième question"),
        ];
        assert_eq!(last_user_content(&history), Some("deuxième question"));
    }

    #[test]
    fn test_last_user_content_none_without_user_message() {
        let history = vec![Message::system("règles"), Message::assistant("bonjour")];
        assert_eq!(last_user_content(&history), None);
        assert!(last_user_content(&[]).is_none());
    }

    #[test]
    fn test_collect_tool_results_scopes_to_current_turn() {
        let mut old_artifact = RecommendationMap::new();
        old_artifact.insert("vid_0".to_string(), recommendation("vid_0", "ancien"));

        let mut artifact = RecommendationMap::new();
        artifact.insert("vid_0".to_string(), recommendation("vid_0", "squat"));

        let history = vec![
            Message::user("avant"),
            Message::tool_result("ancien contexte", old_artifact),
            Message::assistant("ancienne réponse"),
            Message::user("question"),
            Message::tool_result("contexte frais", artifact),
        ];

        let (docs, merged) = collect_tool_results(&history);
        assert_eq!(docs, "contexte frais");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["vid_0"].title, "squat");
    }

    #[test]
    fn test_collect_tool_results_later_entry_wins() {
        let mut first = RecommendationMap::new();
        first.insert("vid_0".to_string(), recommendation("vid_0", "premier"));
        let mut second = RecommendationMap::new();
        second.insert("vid_0".to_string(), recommendation("vid_0", "second"));

        let history = vec![
            Message::user("question"),
            Message::tool_result("a", first),
            Message::tool_result("b", second),
        ];

        let (docs, merged) = collect_tool_results(&history);
        assert_eq!(docs, "ab");
        assert_eq!(merged["vid_0"].title, "second");
    }

    #[test]
    fn test_filtered_history_excludes_tool_requesting_assistants() {
        let history = vec![
            Message::system("règles"),
            Message::user("question"),
            Message::assistant_with_tools(
                "je vais chercher",
                vec![ToolRequest {
                    tool: "retrieve".to_string(),
                    args: serde_json::json!({"query": "squat"}),
                }],
            ),
            Message::tool_result("contexte", RecommendationMap::new()),
            Message::assistant("réponse directe"),
        ];

        let filtered = filtered_history(&history);
        let contents: Vec<&str> = filtered.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["règles", "question", "réponse directe"]);
    }

    #[test]
    fn test_grounding_prompt_embeds_context_and_question() {
        let prompt = grounding_prompt("**Squat**\ncorps", "Comment faire un squat ?");
        assert!(prompt.contains("**Squat**\ncorps"));
        assert!(prompt.contains("Question : Comment faire un squat ?"));
    }

    #[test]
    fn test_compose_system_prompt_embeds_docs() {
        let prompt = compose_system_prompt("le contenu récupéré");
        assert!(prompt.contains("CONTEXTE DE LA BASE DE CONNAISSANCES"));
        assert!(prompt.ends_with("le contenu récupéré"));
    }
}
