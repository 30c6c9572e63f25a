//! System prompt templates for the model-backed research stages.
//!
//! Placeholders are `{name}` and are filled by [`render`].

use std::sync::LazyLock;

use regex::{Captures, Regex};

pub const PLANNER: &str = r#"You are a planner. Build a plan that helps your team answer the research question using a web search engine.
Questions range from simple lookups to multi-step investigations. Lead with the single most useful search term; a teammate will run it.

If feedback is present, revise the plan to address it.
Feedback: {feedback}

Current date and time:
{datetime}

Respond with a JSON object with these keys:
  "search_term": the most relevant search term to start with
  "overall_strategy": the strategy that should guide the search
  "additional_information": other search terms, filters, or hints
"#;

pub const SELECTOR: &str = r#"You are a selector. Below is a search engine results page. Pick the single most relevant result for the research question and explain why.

Search results:
{serp}

Respond with a JSON object with these keys:
  "selected_page_url": the exact URL of the chosen result
  "description": a short description of the page
  "reason_for_selection": why this page was chosen

Take this feedback into account:
Feedback: {feedback}

Pages you selected before (prefer a different page if they did not help):
{previous_selections}

Current date and time:
{datetime}
"#;

pub const REPORTER: &str = r#"You are a reporter. Answer the research question using the research below, which gives the source URL and the text of the page.
Cite your sources inline with bracketed numbers and list them at the end.

Research: {research}

Example shape:
The sky looks blue because shorter wavelengths scatter more strongly in the atmosphere [1].

Sources:
[1] https://example.com/why-is-the-sky-blue

Adjust your answer to this feedback:
Feedback: {feedback}

Your previous reports:
{previous_reports}

Current date and time:
{datetime}
"#;

pub const REVIEWER: &str = r#"You are a reviewer. Review the reporter's answer to the research question.

Reporter's answer: {reporter}

Explain why the answer passes or fails, with concrete suggestions for improvement.
Take your earlier feedback into account:
Feedback: {feedback}

Current date and time:
{datetime}

Work done so far by the team (entries per channel):
{state}

Respond with a JSON object with these keys:
  "feedback": what must change for the answer to pass, or why it passes
  "pass_review": true or false
  "comprehensive": true or false
  "citations_provided": true or false
  "relevant_to_research_question": true or false
"#;

pub const ROUTER: &str = r#"You are a router. Given the reviewer's verdict, decide which team member should act next.

Reviewer's verdict: {feedback}

Choose exactly one of:
  "planner": the search strategy was wrong and must be re-planned
  "selector": the search results were fine but a different page should be read
  "reporter": the research was fine but the report must be rewritten
  "final_report": the report passed review
  "end": nothing useful can be done

Respond with a JSON object with these keys:
  "next_agent": one of the names above
  "reason": a short justification
"#;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is valid"));

/// Substitute `{key}` placeholders in one pass over the template. Inserted
/// values are never rescanned. Unknown placeholders are left in place.
pub fn render(template: &str, values: &[(&str, &str)]) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let key = &caps[1];
            values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_fills_placeholders() {
        let text = render("a {x} b {y} {z}", &[("x", "1"), ("y", "2")]);
        assert_eq!(text, "a 1 b 2 {z}");
    }

    #[test]
    fn inserted_values_are_not_rescanned() {
        let text = render(
            "Research: {research}\nFeedback: {feedback}",
            &[
                ("research", "page text mentions {feedback} literally"),
                ("feedback", "CITE MORE"),
            ],
        );
        assert_eq!(
            text,
            "Research: page text mentions {feedback} literally\nFeedback: CITE MORE"
        );
    }

    #[test]
    fn templates_declare_expected_placeholders() {
        for key in ["{feedback}", "{datetime}"] {
            assert!(PLANNER.contains(key));
            assert!(SELECTOR.contains(key));
            assert!(REPORTER.contains(key));
            assert!(REVIEWER.contains(key));
        }
        assert!(SELECTOR.contains("{serp}"));
        assert!(REPORTER.contains("{research}"));
        assert!(REVIEWER.contains("{state}"));
        assert!(ROUTER.contains("\"next_agent\""));
    }
}
