//! Prompt templates used by the research stages.

use std::sync::LazyLock;

use chrono::Local;
use pro_search_model::{ModelMessage, ModelRequest, ResponseFormat};
use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([a-z_]+)\}").expect("placeholder pattern is valid")
});

/// Identifies one of the built-in prompt templates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PromptTemplate {
    /// Writes the initial queries for a question.
    QueryWriter,
    /// Writes one follow-up query per knowledge gap.
    FollowUpWriter,
    /// Judges sufficiency and lists knowledge gaps.
    Reflection,
    /// Writes the final cited answer.
    Answer,
}

impl PromptTemplate {
    /// Returns the stable identifier of the template.
    pub fn id(self) -> &'static str {
        match self {
            PromptTemplate::QueryWriter => "query_writer",
            PromptTemplate::FollowUpWriter => "follow_up_writer",
            PromptTemplate::Reflection => "reflection",
            PromptTemplate::Answer => "answer",
        }
    }

    fn system(self) -> &'static str {
        match self {
            PromptTemplate::QueryWriter | PromptTemplate::FollowUpWriter => {
                "You write web search queries for an automated research assistant."
            }
            PromptTemplate::Reflection => {
                "You are an expert research assistant reviewing collected evidence."
            }
            PromptTemplate::Answer => {
                "You are an expert research assistant writing a sourced answer."
            }
        }
    }

    fn body(self) -> &'static str {
        match self {
            PromptTemplate::QueryWriter => QUERY_WRITER,
            PromptTemplate::FollowUpWriter => FOLLOW_UP_WRITER,
            PromptTemplate::Reflection => REFLECTION,
            PromptTemplate::Answer => ANSWER,
        }
    }
}

const QUERY_WRITER: &str = r#"Generate diverse web search queries for the research topic below.

Instructions:
- Produce exactly {number_queries} queries.
- Every query targets a different aspect of the topic. Never produce two queries that would return the same pages.
- Prefer specific queries over broad ones and ask for current information. The current date is {current_date}.
- Give every query a one-sentence rationale.

Respond with a JSON object of the form:
{"queries": [{"query": "...", "rationale": "..."}]}

Research topic: {research_topic}"#;

const FOLLOW_UP_WRITER: &str = r#"Earlier searches for the research topic below left knowledge gaps. Write exactly one web search query per gap, {number_queries} in total, in the order the gaps are listed.

Instructions:
- Each query must close its gap on its own, so carry over the context it needs from the topic.
- Do not repeat a query that was already run.
- The current date is {current_date}.

Respond with a JSON object of the form:
{"queries": [{"query": "...", "rationale": "..."}]}

Research topic: {research_topic}

Knowledge gaps:
{knowledge_gaps}

Queries already run:
{existing_queries}"#;

const REFLECTION: &str = r#"Review the search results gathered for the research topic below.

Instructions:
- Decide whether the results are sufficient to answer the topic completely and accurately.
- If they are not, list every concrete knowledge gap (a missing fact, an unclear detail, outdated information) as one short sentence, most important first, at most {max_gaps} gaps.
- Results marked as failed returned nothing. Consider whether the coverage they were meant to provide is missing.
- The current date is {current_date}.

Respond with a JSON object of the form:
{"is_sufficient": true, "knowledge_gaps": ["..."]}

Research topic: {research_topic}

Search results:
{summaries}"#;

const ANSWER: &str = r#"Write a well-structured answer to the research topic below, using only the search results provided.

Instructions:
- Support every claim with the marker of its source exactly as it appears in the results, for example [src:1]. Cite several sources with several markers, for example [src:1][src:4].
- Never invent a marker. Only the sources listed below exist.
- Do not add a bibliography, sources are linked automatically.
- The current date is {current_date}.

Research topic: {research_topic}

Sources:
{sources}

Search results:
{summaries}"#;

/// A template bound to its variables.
#[derive(Clone, Debug)]
pub struct Prompt {
    template: PromptTemplate,
    variables: Vec<(&'static str, String)>,
}

impl Prompt {
    /// Creates a prompt, with `current_date` already bound.
    pub fn new(template: PromptTemplate) -> Self {
        let current_date = Local::now().format("%B %d, %Y").to_string();
        Self {
            template,
            variables: vec![("current_date", current_date)],
        }
    }

    /// Binds a variable.
    #[inline]
    pub fn var<S: Into<String>>(mut self, name: &'static str, value: S) -> Self {
        self.variables.push((name, value.into()));
        self
    }

    /// Returns the template of this prompt.
    #[inline]
    pub fn template(&self) -> PromptTemplate {
        self.template
    }

    /// Substitutes every `{name}` placeholder of the template.
    ///
    /// Placeholders are filled in a single pass over the template, so bound
    /// values are inserted verbatim even when they contain braces. Unknown
    /// names are left as they are.
    pub fn render(&self) -> String {
        PLACEHOLDER
            .replace_all(self.template.body(), |caps: &Captures<'_>| {
                let name = &caps[1];
                match self.variables.iter().rev().find(|(n, _)| *n == name) {
                    Some((_, value)) => value.clone(),
                    None => caps[0].to_owned(),
                }
            })
            .into_owned()
    }

    /// Builds a model request for this prompt.
    ///
    /// `rejection` carries the reason a previous reply was refused, which
    /// turns the request into the stricter retry variant.
    pub(crate) fn to_request(
        &self,
        response_format: Option<ResponseFormat>,
        temperature: f32,
        rejection: Option<&str>,
    ) -> ModelRequest {
        let mut system = self.template.system().to_owned();
        if let Some(reason) = rejection {
            system.push_str(&format!(
                "\n\nIMPORTANT: your previous reply was rejected because: \
                 {reason}. Reply with a single JSON object that matches the \
                 required schema exactly. Do not add prose or code fences."
            ));
        }
        ModelRequest {
            messages: vec![
                ModelMessage::System(system),
                ModelMessage::User(self.render()),
            ],
            response_format,
            temperature: Some(temperature),
        }
    }
}
