use crate::embeddings::Embedder;
use crate::error::AnswerError;
use crate::index::DEFAULT_TOP_K;
use crate::models::{Answer, AnswerPath, ScoredChunk};
use crate::traits::{GenerativeModel, PromptPart, VectorStore};
use std::sync::Arc;
use tracing::{debug, info};

pub const GREETINGS: [&str; 5] = ["hi", "hello", "hey", "hii", "welcome"];

pub const GREETING_REPLY: &str = "Hello! How can I help you today?";

pub const NOT_IN_CONTEXT: &str = "answer is not available in the context.";

pub fn is_greeting(question: &str) -> bool {
    let normalized = question.trim().to_lowercase();
    GREETINGS.contains(&normalized.as_str())
}

pub fn grounded_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the question as detailed as possible from the provided context. \
         If the answer is not in the context, just say, \"{NOT_IN_CONTEXT}\"\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Answer:\n"
    )
}

/// Answers questions from the persisted index, or straight from a model when
/// there is nothing to ground on.
pub struct Answerer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    grounded: Arc<dyn GenerativeModel>,
    fallback: Arc<dyn GenerativeModel>,
    top_k: usize,
}

impl Answerer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        grounded: Arc<dyn GenerativeModel>,
        fallback: Arc<dyn GenerativeModel>,
    ) -> Self {
        Self {
            embedder,
            store,
            grounded,
            fallback,
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, AnswerError> {
        if is_greeting(question) {
            return Ok(Answer {
                text: GREETING_REPLY.to_string(),
                path: AnswerPath::Greeting,
            });
        }

        let candidates = self.retrieve(question).await?;

        if candidates.is_empty() {
            info!(model = self.fallback.model_name(), "answering without context");
            let text = self
                .fallback
                .generate(&[PromptPart::text(question)])
                .await?;
            return Ok(Answer {
                text,
                path: AnswerPath::Ungrounded,
            });
        }

        let context = candidates
            .iter()
            .map(|hit| hit.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        info!(
            model = self.grounded.model_name(),
            candidates = candidates.len(),
            "answering from context"
        );
        let text = self
            .grounded
            .generate(&[PromptPart::Text(grounded_prompt(&context, question))])
            .await?;

        Ok(Answer {
            text,
            path: AnswerPath::Grounded,
        })
    }

    pub async fn retrieve(&self, question: &str) -> Result<Vec<ScoredChunk>, AnswerError> {
        let Some(index) = self.store.load().await? else {
            return Ok(Vec::new());
        };
        if index.is_empty() {
            return Ok(Vec::new());
        }

        let indexed = &index.manifest().embedding_model;
        if indexed != self.embedder.model_name() {
            return Err(AnswerError::EmbeddingModelMismatch {
                indexed: indexed.clone(),
                configured: self.embedder.model_name().to_string(),
            });
        }

        let query = self.embedder.embed_query(question).await?;
        let hits = index.similarity_search(&query, self.top_k)?;
        debug!(hits = hits.len(), top_k = self.top_k, "similarity search");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::{IndexError, ModelError};
    use crate::index::FlatIndex;
    use crate::models::TextChunk;
    use crate::stores::LocalIndexStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_documents(texts).await
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed_query(text).await
        }
    }

    #[derive(Default)]
    struct UnreachableStore {
        loads: AtomicUsize,
    }

    #[async_trait]
    impl VectorStore for UnreachableStore {
        async fn exists(&self) -> bool {
            self.loads.fetch_add(1, Ordering::SeqCst);
            false
        }

        async fn load(&self) -> Result<Option<FlatIndex>, IndexError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn replace(&self, _index: &FlatIndex) -> Result<(), IndexError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Records prompts and replies with a fixed string.
    struct ScriptedModel {
        reply: Result<String, ()>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(reply: &str) -> Self {
            Self {
                reply: Ok(reply.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("not poisoned").clone()
        }
    }

    #[async_trait]
    impl GenerativeModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, parts: &[PromptPart]) -> Result<String, ModelError> {
            let prompt = parts
                .iter()
                .filter_map(|part| match part {
                    PromptPart::Text(text) => Some(text.clone()),
                    PromptPart::InlineData { .. } => None,
                })
                .collect::<String>();
            self.prompts.lock().expect("not poisoned").push(prompt);
            self.reply.clone().map_err(|_| ModelError::Api {
                model: "scripted".to_string(),
                status: 401,
                body: "API key not valid".to_string(),
            })
        }
    }

    /// Answers with the context line sharing a word with the question, the
    /// way an instruction-following model would.
    struct ContextBoundModel;

    #[async_trait]
    impl GenerativeModel for ContextBoundModel {
        fn model_name(&self) -> &str {
            "context-bound"
        }

        async fn generate(&self, parts: &[PromptPart]) -> Result<String, ModelError> {
            let Some(PromptPart::Text(prompt)) = parts.first() else {
                return Err(ModelError::EmptyResponse("context-bound".to_string()));
            };
            let context = prompt
                .split_once("Context:\n")
                .and_then(|(_, rest)| rest.split_once("\n\nQuestion: "))
                .map(|(context, _)| context)
                .unwrap_or_default();
            let question = prompt
                .split_once("Question: ")
                .and_then(|(_, rest)| rest.split_once("\n\nAnswer:"))
                .map(|(question, _)| question.to_lowercase())
                .unwrap_or_default();

            let keywords = question
                .split(|ch: char| !ch.is_alphanumeric())
                .filter(|word| word.len() > 4)
                .collect::<Vec<_>>();

            let found = context.lines().find(|line| {
                let line = line.to_lowercase();
                keywords.iter().any(|word| line.contains(word))
            });

            Ok(found
                .map(str::to_string)
                .unwrap_or_else(|| NOT_IN_CONTEXT.to_string()))
        }
    }

    fn chunks(texts: &[&str]) -> Vec<TextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| TextChunk {
                index,
                start: 0,
                end: text.len(),
                text: text.to_string(),
            })
            .collect()
    }

    async fn store_with(
        dir: &std::path::Path,
        texts: &[&str],
    ) -> Result<Arc<LocalIndexStore>, Box<dyn std::error::Error>> {
        let store = Arc::new(LocalIndexStore::new(dir.join("faiss_index")));
        let chunks = chunks(texts);
        let embedder = CharacterNgramEmbedder::default();
        let vectors = chunks.iter().map(|chunk| embedder.embed(&chunk.text)).collect();
        store
            .replace(&FlatIndex::build(&chunks, vectors, "local/char-trigram")?)
            .await?;
        Ok(store)
    }

    #[test]
    fn greetings_match_case_and_whitespace_insensitively() {
        for question in ["hi", "Hello", "HEY", "  welcome  ", "hii"] {
            assert!(is_greeting(question), "{question:?} should be a greeting");
        }
        for question in ["hi there", "hello?", "", "greetings"] {
            assert!(!is_greeting(question), "{question:?} is not a greeting");
        }
    }

    #[test]
    fn grounded_prompt_embeds_context_question_and_fallback_phrase() {
        let prompt = grounded_prompt("Water boils at 100 C.", "When does water boil?");
        assert!(prompt.contains("\"answer is not available in the context.\""));
        assert!(prompt.contains("Context:\nWater boils at 100 C.\n\n"));
        assert!(prompt.contains("Question: When does water boil?\n\nAnswer:"));
    }

    #[tokio::test]
    async fn greeting_never_touches_services() {
        let embedder = Arc::new(CountingEmbedder::default());
        let store = Arc::new(UnreachableStore::default());
        let grounded = Arc::new(ScriptedModel::replying("grounded"));
        let fallback = Arc::new(ScriptedModel::replying("fallback"));
        let answerer = Answerer::new(
            embedder.clone(),
            store.clone(),
            grounded.clone(),
            fallback.clone(),
        );

        for question in ["hi", "Hello", "HEY", "  welcome  "] {
            let answer = answerer.answer(question).await.expect("greeting never fails");
            assert_eq!(answer.text, GREETING_REPLY);
            assert_eq!(answer.path, AnswerPath::Greeting);
        }

        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.loads.load(Ordering::SeqCst), 0);
        assert!(grounded.prompts().is_empty());
        assert!(fallback.prompts().is_empty());
    }

    #[tokio::test]
    async fn missing_index_uses_only_the_unconstrained_model(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let embedder = Arc::new(CountingEmbedder::default());
        let grounded = Arc::new(ScriptedModel::replying("grounded"));
        let fallback = Arc::new(ScriptedModel::replying("Paris is the capital of France."));
        let answerer = Answerer::new(
            embedder.clone(),
            Arc::new(LocalIndexStore::new(dir.path().join("faiss_index"))),
            grounded.clone(),
            fallback.clone(),
        );

        let answer = answerer.answer("What is the capital of France?").await?;
        assert_eq!(answer.path, AnswerPath::Ungrounded);
        assert_eq!(answer.text, "Paris is the capital of France.");
        assert_eq!(fallback.prompts(), vec!["What is the capital of France?"]);
        assert!(grounded.prompts().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn empty_index_falls_back_to_unconstrained_model(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = store_with(dir.path(), &[]).await?;
        let grounded = Arc::new(ScriptedModel::replying("grounded"));
        let fallback = Arc::new(ScriptedModel::replying("general answer"));
        let answerer = Answerer::new(
            Arc::new(CountingEmbedder::default()),
            store,
            grounded.clone(),
            fallback.clone(),
        );

        let answer = answerer.answer("Explain entropy").await?;
        assert_eq!(answer.path, AnswerPath::Ungrounded);
        assert_eq!(fallback.prompts().len(), 1);
        assert!(grounded.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn known_fact_is_answered_from_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = store_with(
            dir.path(),
            &[
                "Chapter one covers cell membranes and diffusion.",
                "The capital of Freedonia is Fredville.",
                "Chapter three lists enzyme kinetics formulas.",
            ],
        )
        .await?;
        let fallback = Arc::new(ScriptedModel::replying("fallback"));
        let answerer = Answerer::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store,
            Arc::new(ContextBoundModel),
            fallback.clone(),
        );

        let answer = answerer.answer("What is the capital of Freedonia?").await?;
        assert_eq!(answer.path, AnswerPath::Grounded);
        assert!(answer.text.contains("Fredville"));

        let unrelated = answerer.answer("Who painted the Mona Lisa?").await?;
        assert_eq!(unrelated.path, AnswerPath::Grounded);
        assert_eq!(unrelated.text, NOT_IN_CONTEXT);

        assert!(fallback.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_is_capped_at_top_k() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = store_with(
            dir.path(),
            &["one fish", "two fish", "red fish", "blue fish", "old fish", "new fish"],
        )
        .await?;
        let answerer = Answerer::new(
            Arc::new(CharacterNgramEmbedder::default()),
            store,
            Arc::new(ScriptedModel::replying("grounded")),
            Arc::new(ScriptedModel::replying("fallback")),
        );

        assert_eq!(answerer.retrieve("fish").await?.len(), DEFAULT_TOP_K);
        assert_eq!(answerer.with_top_k(2).retrieve("fish").await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn index_from_another_embedding_model_is_rejected(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = store_with(dir.path(), &["The capital of Freedonia is Fredville."]).await?;
        let embedder = Arc::new(CountingEmbedder::default());
        let fallback = Arc::new(ScriptedModel::replying("fallback"));
        let answerer = Answerer::new(
            embedder.clone(),
            store,
            Arc::new(ScriptedModel::replying("grounded")),
            fallback.clone(),
        );

        let result = answerer.answer("What is the capital of Freedonia?").await;
        match result {
            Err(AnswerError::EmbeddingModelMismatch {
                indexed,
                configured,
            }) => {
                assert_eq!(indexed, "local/char-trigram");
                assert_eq!(configured, "counting");
            }
            other => panic!("expected a model mismatch, got {other:?}"),
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
        assert!(fallback.prompts().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn generation_failures_propagate() {
        let dir = tempdir().expect("tempdir");
        let answerer = Answerer::new(
            Arc::new(CountingEmbedder::default()),
            Arc::new(LocalIndexStore::new(dir.path().join("faiss_index"))),
            Arc::new(ScriptedModel::replying("grounded")),
            Arc::new(ScriptedModel::failing()),
        );

        let result = answerer.answer("What is osmosis?").await;
        assert!(matches!(
            result,
            Err(AnswerError::Model(ModelError::Api { status: 401, .. }))
        ));
    }
}
