//! The `gifttest practice` command: an interactive test on stdin.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use gifttest_core::bank::CategoryFilter;
use gifttest_core::context::{FinalizeOutcome, PracticeContext};
use gifttest_core::explain::{ExplainConfig, ExplanationService};
use gifttest_core::model::Question;
use gifttest_core::session::TestSession;
use gifttest_providers::config::{load_config_from, GiftTestConfig};

pub struct PracticeOptions {
    pub file: PathBuf,
    pub categories: Option<String>,
    pub count: Option<usize>,
    pub quick: bool,
    pub seed: Option<u64>,
    pub provider: Option<String>,
}

/// What the `e` command talks to.
struct Explainer {
    service: Arc<ExplanationService>,
    config: ExplainConfig,
}

pub async fn execute(options: PracticeOptions, config_path: Option<PathBuf>) -> Result<()> {
    let config = load_config_from(config_path.as_deref())?;
    let mut ctx = PracticeContext::new(super::open_history(&config)?);

    let warnings = ctx.load_bank(&options.file)?;
    let skipped = warnings.iter().filter(|w| w.rejects_entry()).count();
    if skipped > 0 {
        eprintln!("Warning: {skipped} entries skipped (run `gifttest validate` for details)");
    }

    start_session(&mut ctx, &options, &config)?;

    let kind = super::resolve_provider(&config, options.provider.as_deref())?;
    let explainer = Explainer {
        service: super::explanation_service(&config),
        config: config.explain_config(kind, None),
    };

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    run_session(&mut ctx, Some(&explainer), &mut input, &mut output).await?;

    let outcome = ctx.finalize()?;
    print_summary(&outcome, &mut output)?;
    Ok(())
}

fn start_session(
    ctx: &mut PracticeContext,
    options: &PracticeOptions,
    config: &GiftTestConfig,
) -> Result<()> {
    if options.quick {
        let count = options.count.unwrap_or(config.quick_test_questions);
        ctx.start_quick_test(count, options.seed)?;
        return Ok(());
    }

    let ids = {
        let bank = ctx.bank().context("no question bank loaded")?;
        let names: Vec<&str> = options
            .categories
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();
        let (filters, pool) = if names.is_empty() {
            (vec![CategoryFilter::All], bank.len())
        } else {
            let pool: usize = names.iter().map(|n| bank.category_len(n)).sum();
            (names.iter().map(|n| CategoryFilter::Named(*n)).collect(), pool)
        };
        let count = options.count.unwrap_or(pool.max(1));
        bank.select(&filters, count, options.seed)?
    };
    ctx.start_test(ids)?;
    Ok(())
}

enum Input {
    Choice(usize),
    Clear,
    Next,
    Previous,
    Finish,
    Quit,
    Explain,
    Help,
    Unknown,
}

impl Input {
    fn parse(line: &str) -> Self {
        if let Ok(n) = line.parse::<usize>() {
            return Input::Choice(n);
        }
        match line.to_ascii_lowercase().as_str() {
            "c" => Input::Clear,
            "n" | "" => Input::Next,
            "p" => Input::Previous,
            "f" => Input::Finish,
            "q" => Input::Quit,
            "e" => Input::Explain,
            "h" | "?" => Input::Help,
            _ => Input::Unknown,
        }
    }
}

const HELP: &str = "Commands: <number> answer, c clear answer, n next, p previous, \
f finish, q end now, e explain, h help";

/// Drive the active session from `input` until it terminates. End of input
/// ends the test where it is.
async fn run_session(
    ctx: &mut PracticeContext,
    explainer: Option<&Explainer>,
    input: &mut impl BufRead,
    output: &mut impl Write,
) -> Result<()> {
    writeln!(output, "{HELP}")?;
    let mut redraw = true;

    loop {
        let (session, bank) = match (ctx.session(), ctx.bank()) {
            (Some(s), Some(b)) if !s.state().is_terminal() => (s, b),
            _ => break,
        };
        let id = session
            .current_question()
            .context("session has no current question")?;
        let question = bank
            .by_id(id)
            .cloned()
            .with_context(|| format!("question {id} is not in the bank"))?;
        if redraw {
            print_question(output, session, &question)?;
        }
        redraw = false;

        let Some(line) = super::prompt_line(input, output, "> ")? else {
            writeln!(output, "\nEnd of input, ending the test.")?;
            session_mut(ctx)?.end_now()?;
            break;
        };

        match Input::parse(&line) {
            Input::Choice(n) if (1..=question.answers.len()).contains(&n) => {
                ctx.answer(id, n - 1)?;
                writeln!(output, "Answer {n} recorded.")?;
            }
            Input::Choice(_) => {
                writeln!(output, "Choose an answer between 1 and {}.", question.answers.len())?;
            }
            Input::Clear => {
                session_mut(ctx)?.clear_answer(id)?;
                writeln!(output, "Answer cleared.")?;
            }
            Input::Next => {
                redraw = session_mut(ctx)?.next()?;
                if !redraw {
                    writeln!(output, "This is the last question; use f to finish.")?;
                }
            }
            Input::Previous => {
                redraw = session_mut(ctx)?.previous()?;
                if !redraw {
                    writeln!(output, "This is the first question.")?;
                }
            }
            Input::Finish => {
                let session = session_mut(ctx)?;
                if session.current_index() + 1 != session.len() {
                    writeln!(
                        output,
                        "Finish is available on the last question; use q to end the test now."
                    )?;
                    continue;
                }
                if session.needs_confirmation()
                    && !super::confirm(input, output, "This question has no answer. Finish anyway?")?
                {
                    continue;
                }
                session.finish()?;
            }
            Input::Quit => {
                if super::confirm(
                    input,
                    output,
                    "End the test now? Questions after this one will not count.",
                )? {
                    session_mut(ctx)?.end_now()?;
                }
            }
            Input::Explain => match explainer {
                Some(explainer) => explain(explainer, &question, output).await?,
                None => writeln!(output, "Explanations are not available.")?,
            },
            Input::Help => writeln!(output, "{HELP}")?,
            Input::Unknown => writeln!(output, "Unknown command '{line}'. {HELP}")?,
        }
    }
    Ok(())
}

fn session_mut(ctx: &mut PracticeContext) -> Result<&mut TestSession> {
    ctx.session_mut().context("no active test")
}

fn print_question(output: &mut impl Write, session: &TestSession, question: &Question) -> Result<()> {
    let recorded = session.recorded_answer(question.id);
    writeln!(
        output,
        "\n[{}/{}] {} ({})",
        session.current_index() + 1,
        session.len(),
        question.label(),
        question.category
    )?;
    writeln!(output, "{}", question.stem)?;
    for (i, answer) in question.answers.iter().enumerate() {
        let marker = if recorded == Some(i) { '*' } else { ' ' };
        writeln!(output, " {marker}{}) {}", i + 1, answer.text)?;
    }
    Ok(())
}

async fn explain(explainer: &Explainer, question: &Question, output: &mut impl Write) -> Result<()> {
    writeln!(
        output,
        "Asking {}/{}... (Ctrl-C to cancel)",
        explainer.config.provider, explainer.config.model
    )?;
    output.flush()?;

    let task = explainer
        .service
        .spawn_explain(question.clone(), explainer.config.clone());
    let abort = task.abort_handle();
    tokio::select! {
        result = task.wait() => match result {
            Ok(explanation) => {
                writeln!(output, "\n{}\n", explanation.text.trim())?;
                if let Some(e) = explanation.persist_error {
                    writeln!(output, "(not saved to cache: {e})")?;
                }
            }
            Err(e) => writeln!(output, "Explanation failed: {e}")?,
        },
        _ = tokio::signal::ctrl_c() => {
            abort.abort();
            writeln!(output, "\nExplanation cancelled.")?;
        }
    }
    Ok(())
}

fn print_summary(outcome: &FinalizeOutcome, output: &mut impl Write) -> Result<()> {
    let s = outcome.summary();
    let how = match s.outcome {
        gifttest_core::scoring::TestOutcome::Completed => "Test completed",
        gifttest_core::scoring::TestOutcome::EndedEarly => "Test ended early",
    };
    writeln!(
        output,
        "\n{how}: {}/{} correct ({:.1}%), {} answered",
        s.correct, s.total_asked, s.percentage, s.answered
    )?;

    if !s.wrong_details.is_empty() {
        writeln!(output, "\nReview:")?;
        for w in &s.wrong_details {
            let name = w
                .question_name
                .clone()
                .unwrap_or_else(|| format!("#{}", w.question_id));
            writeln!(output, "- {name}: {}", w.question_text)?;
            writeln!(
                output,
                "    your answer: {}",
                w.given_answer.as_deref().unwrap_or("(no answer)")
            )?;
            writeln!(output, "    correct:     {}", w.correct_answer)?;
        }
    }

    match outcome {
        FinalizeOutcome::Recorded { .. } => writeln!(output, "\nResult saved to history.")?,
        FinalizeOutcome::SkippedNoAnswers { .. } => {
            writeln!(output, "\nNo question answered; result not saved.")?
        }
        FinalizeOutcome::PersistenceFailed { error, .. } => {
            writeln!(output, "\nWarning: result kept for this run but not saved: {error}")?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use gifttest_core::cache::ExplanationCache;
    use gifttest_core::history::HistoryStore;
    use gifttest_core::model::QuestionId;
    use gifttest_core::parser::parse;
    use gifttest_core::session::SessionState;
    use gifttest_core::traits::LlmProvider;
    use gifttest_providers::mock::MockProvider;

    const BANK: &str = "\
$CATEGORY: Geo
::Q1:: Capital of Portugal? {=Lisboa ~Porto}

::Q2:: Capital of Spain? {=Madrid ~Sevilha}

$CATEGORY: Astro
::Q3:: Largest planet? {=Jupiter ~Mars}
";

    fn context() -> PracticeContext {
        let mut ctx = PracticeContext::new(HistoryStore::in_memory());
        ctx.replace_bank(parse(BANK, "practice.gift").0);
        ctx.start_test(vec![QuestionId(1), QuestionId(2), QuestionId(3)])
            .unwrap();
        ctx
    }

    async fn drive(ctx: &mut PracticeContext, script: &str) -> String {
        let mut out = Vec::new();
        run_session(ctx, None, &mut script.as_bytes(), &mut out)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn ending_early_scores_only_the_reached_questions() {
        let mut ctx = context();
        drive(&mut ctx, "1\nn\n2\nn\nq\ny\n").await;
        assert_eq!(ctx.session().unwrap().state(), SessionState::EndedEarly);

        let outcome = ctx.finalize().unwrap();
        let summary = outcome.summary();
        assert_eq!(summary.total_asked, 2);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.percentage, 50.0);
        assert!(matches!(outcome, FinalizeOutcome::Recorded { .. }));
        assert_eq!(ctx.history().len(), 1);
    }

    #[tokio::test]
    async fn finish_only_on_the_last_question() {
        let mut ctx = context();
        let out = drive(&mut ctx, "f\nn\nn\nf\nn\n").await;
        assert!(out.contains("Finish is available on the last question"));
        assert!(out.contains("This question has no answer"));
        // Declined, then input ran out.
        assert_eq!(ctx.session().unwrap().state(), SessionState::EndedEarly);
    }

    #[tokio::test]
    async fn completed_test_with_every_answer() {
        let mut ctx = context();
        let out = drive(&mut ctx, "1\nn\n1\nn\n2\nf\n").await;
        assert!(out.contains("[3/3] Q3 (Astro)"));
        assert_eq!(ctx.session().unwrap().state(), SessionState::Completed);

        let outcome = ctx.finalize().unwrap();
        assert_eq!(outcome.summary().correct, 2);
        assert_eq!(outcome.summary().wrong_details.len(), 1);

        let mut printed = Vec::new();
        print_summary(&outcome, &mut printed).unwrap();
        let printed = String::from_utf8(printed).unwrap();
        assert!(printed.contains("Test completed: 2/3 correct (66.7%)"));
        assert!(printed.contains("your answer: Mars"));
    }

    #[tokio::test]
    async fn nothing_answered_is_not_recorded() {
        let mut ctx = context();
        drive(&mut ctx, "").await;
        let outcome = ctx.finalize().unwrap();
        assert!(matches!(outcome, FinalizeOutcome::SkippedNoAnswers { .. }));
        assert!(ctx.history().is_empty());
    }

    #[tokio::test]
    async fn out_of_range_choices_are_rejected() {
        let mut ctx = context();
        let out = drive(&mut ctx, "7\n").await;
        assert!(out.contains("Choose an answer between 1 and 2"));
        assert_eq!(ctx.session().unwrap().answered_count(), 0);
    }

    #[tokio::test]
    async fn explain_prints_the_provider_text() {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        providers.insert(
            "mock".into(),
            Arc::new(MockProvider::with_fixed_response("Lisboa é a capital desde 1255.")),
        );
        let explainer = Explainer {
            service: Arc::new(ExplanationService::new(providers, ExplanationCache::in_memory())),
            config: ExplainConfig::new("mock", "mock-model"),
        };

        let mut ctx = context();
        let mut out = Vec::new();
        run_session(&mut ctx, Some(&explainer), &mut "e\n".as_bytes(), &mut out)
            .await
            .unwrap();
        assert!(String::from_utf8(out)
            .unwrap()
            .contains("Lisboa é a capital desde 1255."));
    }
}
