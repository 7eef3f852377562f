use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::llm::{parse_agent_reply, prompts, AgentCommand, AgentReply, LlmProvider};
use crate::models::{InboundEvent, MemoryDraft, MemoryFilters};
use crate::poller::PollerHandle;
use crate::services::{ContextAssembler, MemoryService};
use crate::slack::ConversationClient;

const ACK_TEXT: &str = ":hourglass: Working on it...";

/// Memory retrieval and persistence, present only when the index came up.
pub struct AgentMemory {
    pub service: Arc<MemoryService>,
    pub assembler: ContextAssembler,
}

/// Consumes inbound events: retrieves context, generates a reply, posts
/// it into the thread, registers the thread for reply polling, persists
/// new memories, and executes side commands.
pub struct Agent {
    client: Arc<dyn ConversationClient>,
    llm: LlmProvider,
    memory: Option<AgentMemory>,
    poller: PollerHandle,
    system_prompt_extra: Option<String>,
}

impl Agent {
    pub fn new(
        client: Arc<dyn ConversationClient>,
        llm: LlmProvider,
        memory: Option<AgentMemory>,
        poller: PollerHandle,
        system_prompt_extra: Option<String>,
    ) -> Self {
        Self {
            client,
            llm,
            memory,
            poller,
            system_prompt_extra,
        }
    }

    /// Process events until the channel closes or shutdown is requested.
    ///
    /// A failing event posts an error message back into its thread and
    /// the loop keeps going; it never crashes the agent.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Agent loop shutting down");
                    break;
                }
                event = rx.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Event channel closed; agent loop stopping");
                        break;
                    };

                    tracing::info!(
                        conversation = %event.conversation_id,
                        author = %event.author_id,
                        "Processing inbound event"
                    );

                    if let Err(error) = self.handle_event(&event).await {
                        tracing::error!(%error, "Event processing failed");
                        let notice = format!(":x: Sorry, I encountered an error: {error}");
                        if let Err(post_error) = self
                            .client
                            .post_message(&event.conversation_id, &notice, Some(&event.thread_key))
                            .await
                        {
                            tracing::error!(%post_error, "Could not post error notice");
                        }
                    }
                }
            }
        }
    }

    async fn handle_event(&self, event: &InboundEvent) -> Result<()> {
        // Immediate acknowledgment so the channel sees the mention landed.
        if let Err(error) = self
            .client
            .post_message(&event.conversation_id, ACK_TEXT, Some(&event.thread_key))
            .await
        {
            tracing::warn!(%error, "Could not post acknowledgment");
        }

        let context_block = match &self.memory {
            Some(memory) => {
                let filters = MemoryFilters {
                    author_id: Some(event.author_id.clone()),
                    ..Default::default()
                };
                memory.assembler.assemble(&event.text, &filters).await.block
            }
            None => String::new(),
        };

        let reply = self.generate_reply(event, &context_block).await?;
        self.apply_reply(event, &reply).await?;
        Ok(())
    }

    /// Ask the response generator for a structured reply.
    ///
    /// No configured LLM degrades to a static notice; malformed
    /// generator output has already been folded into a raw-text reply
    /// by the parser.
    async fn generate_reply(&self, event: &InboundEvent, context_block: &str) -> Result<AgentReply> {
        if !self.llm.is_available() {
            return Ok(AgentReply {
                reply: "I'm online, but no language model is configured. \
                        Set LLM_MODEL to enable replies."
                    .to_string(),
                memory_entries: Vec::new(),
                commands: Vec::new(),
                raw: String::new(),
            });
        }

        let system_prompt = prompts::build_system_prompt(self.system_prompt_extra.as_deref());
        let user_prompt = prompts::build_user_prompt(
            context_block,
            &event.author_id,
            &event.conversation_id,
            &event.text,
        );

        let raw = self
            .llm
            .complete(&user_prompt, Some(&system_prompt), None)
            .await?;
        Ok(parse_agent_reply(&raw))
    }

    /// Post the reply, watch the thread for follow-ups, persist
    /// memories, and run side commands.
    pub(crate) async fn apply_reply(&self, event: &InboundEvent, reply: &AgentReply) -> Result<()> {
        let posted_ts = self
            .client
            .post_message(&event.conversation_id, &reply.reply, Some(&event.thread_key))
            .await?;

        // Watch from our own reply's ts so it is never reprocessed.
        self.poller
            .watch(&event.conversation_id, &event.thread_key, &posted_ts)
            .await;

        self.persist_memories(event, reply).await;
        self.run_commands(&reply.commands).await;

        Ok(())
    }

    /// Store the generator's memory entries, tagged with the event's
    /// scope. Failures are logged and dropped: losing a memory is
    /// acceptable, losing the reply is not.
    async fn persist_memories(&self, event: &InboundEvent, reply: &AgentReply) {
        let Some(memory) = &self.memory else {
            return;
        };

        let drafts: Vec<MemoryDraft> = reply
            .memory_entries
            .iter()
            .filter(|entry| entry.should_persist)
            .map(|entry| MemoryDraft {
                id: None,
                summary: entry.summary.clone(),
                details: entry.details.clone(),
                author_id: Some(event.author_id.clone()),
                conversation_id: Some(event.conversation_id.clone()),
                thread_id: Some(event.thread_key.clone()),
                status: entry.status,
                category: entry.category,
            })
            .collect();

        if drafts.is_empty() {
            return;
        }

        match memory.service.upsert_batch(drafts).await {
            Ok(stored) => tracing::info!(count = stored.len(), "Stored new memories"),
            Err(error) => tracing::warn!(
                stored = error.stored.len(),
                error = %error.source,
                "Memory batch partially failed; entries dropped"
            ),
        }
    }

    /// Execute side commands. Each failure is logged; none is fatal to
    /// the turn.
    async fn run_commands(&self, commands: &[AgentCommand]) {
        for command in commands {
            if let Err(error) = self.run_command(command).await {
                tracing::warn!(?command, %error, "Command failed");
            }
        }
    }

    async fn run_command(&self, command: &AgentCommand) -> Result<()> {
        match command {
            AgentCommand::Dm { user_id, text } => {
                let dm = self.client.open_dm(user_id).await?;
                self.client.post_message(&dm, text, None).await?;
            }
            AgentCommand::Post {
                conversation_id,
                text,
            } => {
                self.client.post_message(conversation_id, text, None).await?;
            }
            AgentCommand::React {
                conversation_id,
                ts,
                emoji,
            } => {
                self.client.add_reaction(conversation_id, ts, emoji).await?;
            }
            AgentCommand::Ping { user_id } => {
                let dm = self.client.open_dm(user_id).await?;
                self.client
                    .post_message(&dm, ":wave: ping! Are you around?", None)
                    .await?;
            }
        }
        Ok(())
    }
}

/// The startup notice DM'd to the agent's own user.
pub fn startup_notice(handle: &str, user_name: &str) -> String {
    format!(
        "*Agent online*\n\n\
         Hi {user_name}! Your agent is now running.\n\n\
         - Mention `@{handle}` in any channel to get my attention\n\
         - DM me directly for private conversations\n\
         - I reply in threads and keep watching them for follow-ups"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextConfig, DatabaseConfig, PollerConfig};
    use crate::db::Database;
    use crate::embeddings::testing::StubEmbedder;
    use crate::llm::MemoryEntry;
    use crate::models::{MemoryCategory, MemoryStatus};
    use crate::poller::testing::MockClient;
    use crate::poller::Poller;
    use crate::slack::Identity;

    const DIMS: usize = 8;

    fn identity() -> Identity {
        Identity {
            user_id: "U_SELF".to_string(),
            user_name: "curator".to_string(),
            team: "acme".to_string(),
        }
    }

    fn poller_config() -> PollerConfig {
        PollerConfig {
            poll_interval_secs: 0,
            event_buffer: 64,
            refresh_every_cycles: 0,
            history_page_limit: 100,
        }
    }

    async fn memory_stack() -> AgentMemory {
        // `MemoryService` opens a fresh connection per operation; a libsql
        // `:memory:` db is isolated per connection, so back the tests with a
        // unique temp file where every connection shares state.
        let path = std::env::temp_dir().join(format!("curator-test-{}.db", nanoid::nanoid!()));
        let config = DatabaseConfig {
            url: format!("file:{}", path.display()),
            auth_token: None,
            local_path: None,
        };
        let db = Database::new(&config, DIMS).await.unwrap();
        let service = Arc::new(MemoryService::new(db, Arc::new(StubEmbedder { dims: DIMS })));
        let assembler = ContextAssembler::new(
            Arc::clone(&service),
            &ContextConfig {
                budget_chars: 2000,
                top_k: 5,
            },
        );
        AgentMemory { service, assembler }
    }

    fn event() -> InboundEvent {
        InboundEvent {
            conversation_id: "C1".to_string(),
            thread_key: "100".to_string(),
            author_id: "U_OTHER".to_string(),
            text: "hey @ai-test what's the deploy plan?".to_string(),
            ts: "100".to_string(),
        }
    }

    async fn agent_parts(
        client: Arc<MockClient>,
        memory: Option<AgentMemory>,
    ) -> (Agent, Poller) {
        client.add_channel("C1");
        let mut poller = Poller::new(
            Arc::clone(&client) as Arc<dyn ConversationClient>,
            &identity(),
            "ai-test",
            poller_config(),
        )
        .unwrap();
        poller.initialize().await.unwrap();

        let agent = Agent::new(
            client,
            LlmProvider::unavailable("test"),
            memory,
            poller.handle(),
            None,
        );
        (agent, poller)
    }

    #[tokio::test]
    async fn test_event_without_llm_posts_fallback_and_watches_thread() {
        let client = Arc::new(MockClient::new());
        let (agent, mut poller) = agent_parts(Arc::clone(&client), None).await;

        agent.handle_event(&event()).await.unwrap();

        let posted = client.posted_messages();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].1, ACK_TEXT);
        assert_eq!(posted[0].2.as_deref(), Some("100"));
        assert!(posted[1].1.contains("no language model is configured"));
        assert_eq!(posted[1].2.as_deref(), Some("100"));

        // The watch request reaches the poller on its next cycle.
        poller.poll_once().await;
        assert_eq!(poller.cursors().watched_count(), 1);
    }

    #[tokio::test]
    async fn test_apply_reply_persists_only_should_persist_entries() {
        let client = Arc::new(MockClient::new());
        let memory = memory_stack().await;
        let service = Arc::clone(&memory.service);
        let (agent, _poller) = agent_parts(Arc::clone(&client), Some(memory)).await;

        let reply = AgentReply {
            reply: "Noted, deploy plan is Friday.".to_string(),
            memory_entries: vec![
                MemoryEntry {
                    summary: "Deploys happen on Fridays".to_string(),
                    details: "Confirmed by the team".to_string(),
                    status: MemoryStatus::Active,
                    category: MemoryCategory::Fact,
                    should_persist: true,
                },
                MemoryEntry {
                    summary: "Ephemeral thought".to_string(),
                    details: String::new(),
                    status: MemoryStatus::Active,
                    category: MemoryCategory::General,
                    should_persist: false,
                },
            ],
            commands: Vec::new(),
            raw: String::new(),
        };

        agent.apply_reply(&event(), &reply).await.unwrap();

        assert_eq!(service.count().await.unwrap(), 1);
        let hits = service
            .query("deploy", &MemoryFilters::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].record.summary, "Deploys happen on Fridays");
        assert_eq!(hits[0].record.author_id.as_deref(), Some("U_OTHER"));
        assert_eq!(hits[0].record.conversation_id.as_deref(), Some("C1"));
        assert_eq!(hits[0].record.thread_id.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_apply_reply_runs_commands() {
        let client = Arc::new(MockClient::new());
        let (agent, _poller) = agent_parts(Arc::clone(&client), None).await;

        let reply = AgentReply {
            reply: "Done.".to_string(),
            memory_entries: Vec::new(),
            commands: vec![
                AgentCommand::Dm {
                    user_id: "U9".to_string(),
                    text: "heads up".to_string(),
                },
                AgentCommand::Post {
                    conversation_id: "C2".to_string(),
                    text: "announcement".to_string(),
                },
                AgentCommand::Ping {
                    user_id: "U7".to_string(),
                },
            ],
            raw: String::new(),
        };

        agent.apply_reply(&event(), &reply).await.unwrap();

        let posted = client.posted_messages();
        // reply + dm + post + ping
        assert_eq!(posted.len(), 4);
        assert_eq!(posted[1].0, "D-U9");
        assert_eq!(posted[1].1, "heads up");
        assert_eq!(posted[2].0, "C2");
        assert_eq!(posted[3].0, "D-U7");
    }

    #[tokio::test]
    async fn test_run_posts_error_notice_into_thread_on_failure() {
        let client = Arc::new(MockClient::new());
        client.add_channel("C1");
        let mut poller = Poller::new(
            Arc::clone(&client) as Arc<dyn ConversationClient>,
            &identity(),
            "ai-test",
            poller_config(),
        )
        .unwrap();
        poller.initialize().await.unwrap();

        // An LLM pointed at a dead endpoint fails the generate step.
        let llm_config = crate::config::LlmConfig {
            model: "broken".to_string(),
            api_key: None,
            base_url: Some("http://127.0.0.1:9/v1".to_string()),
            timeout_secs: 1,
            max_retries: 0,
        };
        let agent = Agent::new(
            Arc::clone(&client) as Arc<dyn ConversationClient>,
            LlmProvider::new(Some(&llm_config)),
            None,
            poller.handle(),
            None,
        );

        let (tx, rx) = mpsc::channel(4);
        tx.send(event()).await.unwrap();
        drop(tx);

        let cancel = CancellationToken::new();
        agent.run(rx, cancel).await;

        let posted = client.posted_messages();
        let error_post = posted
            .iter()
            .find(|(_, text, _)| text.contains("Sorry, I encountered an error"))
            .expect("error notice should be posted");
        assert_eq!(error_post.2.as_deref(), Some("100"));
    }
}
