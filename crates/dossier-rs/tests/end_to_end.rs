//! Whole-turn behaviour against scripted models and a static corpus.

use dossier_rs::agent::TurnEvent;
use dossier_rs::prelude::*;
use dossier_rs::test_support::{
    Purpose, ScriptedModel, StaticCorpus, review_reply, tool_call, verification_reply,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const BEST_QUERY: &str = "find the single best match for X";

fn tenders() -> StaticCorpus {
    StaticCorpus::new()
        .with_hits(vec![SearchHit::new("A", 0.9), SearchHit::new("B", 0.5)])
        .with_record("A", "Road maintenance Leon")
        .with_record("B", "Bridge inspection Burgos")
        .with_record("C", "School roof repair")
}

fn catalog_for(model: Arc<ScriptedModel>, corpus: Arc<StaticCorpus>) -> ToolCatalog {
    let search = Arc::new(IterativeSearch::new(
        model,
        corpus.clone(),
        corpus.clone(),
        SearchConfig::default(),
    ));
    default_catalog(search, corpus.clone(), corpus, None, &[]).unwrap()
}

/// Verifier that scores by which record it is shown.
fn score_by_record(request: &ChatRequest) -> ChatCompletion {
    let prompt = request.last_user_message().unwrap_or_default();
    if prompt.contains("[A] ") {
        verification_reply(9, true)
    } else if prompt.contains("[B] ") {
        verification_reply(4, false)
    } else {
        verification_reply(7, true)
    }
}

/// Refiner that returns `q2`, `q3`, ... in round order.
fn numbered_refiner(request: &ChatRequest) -> ChatCompletion {
    let prior = request
        .last_user_message()
        .unwrap_or_default()
        .matches(". query: ")
        .count();
    ChatCompletion::text(format!(r#"{{"query": "q{}", "rationale": "next"}}"#, prior + 1))
}

#[tokio::test]
async fn mixed_rounds_select_the_majority_record() {
    let corpus = Arc::new(
        tenders()
            .with_query_hits(BEST_QUERY, vec![SearchHit::new("A", 0.9)])
            .with_query_hits("q2", vec![SearchHit::new("B", 0.8)])
            .with_query_hits("q3", vec![SearchHit::new("A", 0.9)])
            .with_query_hits("q4", vec![SearchHit::new("C", 0.7)])
            .with_query_hits("q5", vec![SearchHit::new("A", 0.9)]),
    );
    let model = Arc::new(
        ScriptedModel::new()
            .with_refiner(numbered_refiner)
            .with_verifier(score_by_record),
    );
    let search = IterativeSearch::new(model.clone(), corpus.clone(), corpus, SearchConfig::default());

    let outcome = search.run_iterative_search(BEST_QUERY, SearchMode::Best, 1).await;
    assert_eq!(outcome.selected, vec!["A".to_string()]);
    assert_eq!(outcome.appearances["A"], 3);
    assert!(outcome.reliable);
    assert!(outcome.confidence >= 0.7);
    assert_eq!(outcome.rounds_completed, 5);
    assert_eq!(model.requests_for(Purpose::Refine).len(), 4);
}

#[tokio::test]
async fn appearances_never_exceed_completed_rounds() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(ScriptedModel::new().with_verifier(score_by_record));
    let search = IterativeSearch::new(model, corpus.clone(), corpus, SearchConfig::default());

    let outcome = search.run_iterative_search("roads", SearchMode::Top, 2).await;
    assert!(outcome.rounds_completed <= 5);
    for (id, count) in &outcome.appearances {
        assert!(*count <= outcome.rounds_completed, "{id} seen {count} times");
    }
    assert!(outcome.selected.len() <= 2);
}

#[tokio::test]
async fn repeated_search_is_deterministic() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(ScriptedModel::new().with_verifier(score_by_record));
    let search = IterativeSearch::new(model, corpus.clone(), corpus, SearchConfig::default());

    let first = search.run_iterative_search("roads", SearchMode::Best, 1).await;
    let second = search.run_iterative_search("roads", SearchMode::Best, 1).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn failing_fetches_give_an_unreliable_empty_outcome() {
    let corpus = Arc::new(tenders().failing_all_fetches());
    let model = Arc::new(ScriptedModel::new().with_verifier(score_by_record));
    let search = IterativeSearch::new(model.clone(), corpus.clone(), corpus, SearchConfig::default());

    let outcome = search.run_iterative_search("roads", SearchMode::Best, 1).await;
    assert!(!outcome.reliable);
    assert_eq!(outcome.confidence, 0.0);
    assert!(outcome.selected.is_empty());
    assert_eq!(outcome.rounds_completed, 5);
    assert!(model.requests_for(Purpose::Verify).is_empty());
}

#[tokio::test]
async fn iteration_cap_is_never_exceeded() {
    let corpus = Arc::new(tenders());
    let calls = AtomicU32::new(0);
    let model = Arc::new(ScriptedModel::new().with_agent_fn(move |request| {
        // The forced final answer is requested without tools.
        if request.tools.is_none() {
            return ChatCompletion::text("Best guess: A.");
        }
        let n = calls.fetch_add(1, Ordering::SeqCst);
        tool_call(&format!("c{n}"), "search_records", r#"{"query": "roads"}"#)
    }));
    let catalog = catalog_for(model.clone(), corpus);
    let config = AgentConfig::default().with_max_iterations(3);

    let transcript = AgentLoop::new(model.as_ref(), &catalog, config)
        .run("which road tender?", &[])
        .await
        .unwrap();
    assert_eq!(transcript.iterations, 3);
    assert_eq!(transcript.stop, StopReason::Exhausted);
    assert!(transcript.truncated);
    assert_eq!(transcript.answer, "Best guess: A.");
    assert_eq!(transcript.exchanges.len(), 3);
}

#[tokio::test]
async fn every_invocation_gets_exactly_one_result() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(
        ScriptedModel::new().with_agent_replies([
            ChatCompletion::tool_calls(vec![
                ToolCall::new("c1", "fetch_record", r#"{"record_id": "A"}"#),
                ToolCall::new("c2", "fetch_record", r#"{"record_id": "B"}"#),
                ToolCall::new("c3", "no_such_tool", "{}"),
            ]),
            ChatCompletion::text("A and B."),
        ]),
    );
    let catalog = catalog_for(model.clone(), corpus);

    let transcript = AgentLoop::new(model.as_ref(), &catalog, AgentConfig::default())
        .run("compare A and B", &[])
        .await
        .unwrap();
    assert_eq!(transcript.exchanges.len(), 3);
    let ids: Vec<&str> = transcript
        .exchanges
        .iter()
        .map(|e| e.invocation.call_id.as_str())
        .collect();
    assert_eq!(ids, ["c1", "c2", "c3"]);

    // The second decision saw one tool message per call.
    let second = &model.requests_for(Purpose::Agent)[1];
    let tool_messages = second
        .messages
        .iter()
        .filter(|m| m.tool_call_id.is_some())
        .count();
    assert_eq!(tool_messages, 3);
}

#[tokio::test]
async fn missing_record_is_reported_and_the_loop_continues() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(ScriptedModel::new().with_agent_replies([
        tool_call("c1", "fetch_record", r#"{"record_id": "does_not_exist"}"#),
        ChatCompletion::text("No such record."),
    ]));
    let catalog = catalog_for(model.clone(), corpus);

    let transcript = AgentLoop::new(model.as_ref(), &catalog, AgentConfig::default())
        .run("show does_not_exist", &[])
        .await
        .unwrap();
    assert_eq!(transcript.stop, StopReason::Finished);
    assert_eq!(transcript.answer, "No such record.");
    let result = &transcript.exchanges[0].result;
    assert!(!result.success());
    assert_eq!(result.error_kind(), Some(dossier_rs::error::ToolErrorKind::Execution));
}

#[tokio::test]
async fn turn_runs_two_passes_and_merges_evidence() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(
        ScriptedModel::new()
            .with_agent_replies([
                tool_call("c1", "fetch_record", r#"{"record_id": "A"}"#),
                ChatCompletion::text("Draft: A."),
                tool_call("c2", "fetch_record", r#"{"record_id": "A"}"#),
                tool_call("c3", "fetch_record", r#"{"record_id": "B"}"#),
                ChatCompletion::text("Final: A, not B."),
            ])
            .with_reviewer(|_| review_reply(60.0, 50.0, 40.0)),
    );
    let catalog = catalog_for(model.clone(), corpus);
    let log = EventLog::new();

    let outcome = TurnRunner::new(
        model.as_ref(),
        &catalog,
        AgentConfig::default(),
        ReviewConfig::default(),
    )
    .with_event_handler(&log)
    .run_agent_turn("which road tender?", &[])
    .await
    .unwrap();

    assert_eq!(outcome.answer, "Final: A, not B.");
    assert_eq!(outcome.initial.answer, "Draft: A.");
    assert!(!outcome.verdict.is_approved());
    assert_eq!(outcome.total_iterations, 5);
    assert_eq!(
        outcome.evidence,
        vec![
            EvidenceRef::new("A", "Road maintenance Leon"),
            EvidenceRef::new("B", "Bridge inspection Burgos"),
        ]
    );
    let fetches = outcome
        .tool_usage
        .iter()
        .find(|u| u.name == "fetch_record")
        .unwrap();
    assert_eq!(fetches.calls, 3);

    let passes = log
        .snapshot()
        .iter()
        .filter(|e| matches!(e.event, TurnEvent::PassStarted { .. }))
        .count();
    assert_eq!(passes, 2);
    assert_eq!(model.requests_for(Purpose::Review).len(), 1);
}

#[tokio::test]
async fn capped_turn_still_answers() {
    let corpus = Arc::new(tenders());
    let model = Arc::new(
        ScriptedModel::new()
            .with_agent_fn(|request| {
                if request.tools.is_none() {
                    ChatCompletion::text("Partial answer from what was found.")
                } else {
                    tool_call("c", "search_records", r#"{"query": "roads"}"#)
                }
            })
            .with_reviewer(|_| review_reply(70.0, 70.0, 70.0)),
    );
    let catalog = catalog_for(model.clone(), corpus);
    let config = AgentConfig::default().with_max_iterations(2);

    let outcome = TurnRunner::new(model.as_ref(), &catalog, config, ReviewConfig::default())
        .run_agent_turn("roads?", &[])
        .await
        .unwrap();
    assert!(outcome.truncated);
    assert!(!outcome.answer.is_empty());
    assert_eq!(outcome.total_iterations, 4);
}
