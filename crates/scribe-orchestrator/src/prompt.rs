//! Prompt builders for the completion-backed stages
//!
//! System prompts (the standing instructions) come from configuration. The
//! builders here produce the per-call user prompt: the concrete request
//! plus whatever feedback the previous attempt earned.

use scribe_core::{ExecutionOutcome, Requirements};

fn push_list(prompt: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    prompt.push_str(&format!("**{}:**\n", heading));
    for item in items {
        prompt.push_str(&format!("- {}\n", item));
    }
    prompt.push('\n');
}

/// Ask the analyst to turn a request into requirements
pub fn build_analyst_prompt(request: &str) -> String {
    format!(
        "## USER REQUEST\n\n{}\n\nRespond with the requirements JSON object only.",
        request.trim()
    )
}

/// Base code generation prompt for a set of requirements
pub fn build_developer_prompt(requirements: &Requirements) -> String {
    let mut prompt = String::new();

    prompt.push_str("## TASK\n\n");
    prompt.push_str(&requirements.task);
    prompt.push_str("\n\n");

    push_list(&mut prompt, "Inputs", &requirements.inputs);
    push_list(&mut prompt, "Expected Output", &requirements.outputs);
    push_list(&mut prompt, "Constraints", &requirements.constraints);

    prompt.push_str(
        "Write the JavaScript snippet now. The value of its last expression is the result.",
    );
    prompt
}

/// Regeneration prompt after the reviewer rejected `code`
pub fn build_review_retry_prompt(base_prompt: &str, code: &str, comments: &str) -> String {
    let mut prompt = String::new();

    prompt.push_str("## REVIEW FEEDBACK\n\n");
    prompt.push_str("Your previous code was rejected. Address every comment below.\n\n");
    prompt.push_str("**Previous code:**\n```javascript\n");
    prompt.push_str(code.trim());
    prompt.push_str("\n```\n\n");
    prompt.push_str("**Reviewer comments:**\n");
    prompt.push_str(comments.trim());
    prompt.push_str("\n\n");

    prompt.push_str("## ORIGINAL REQUEST\n\n");
    prompt.push_str(base_prompt);
    prompt
}

/// Regeneration prompt after `outcome` failed to run
pub fn build_execution_retry_prompt(base_prompt: &str, outcome: &ExecutionOutcome) -> String {
    let mut prompt = String::new();

    prompt.push_str("## EXECUTION FAILURE\n\n");
    prompt.push_str("Your previous code did not run successfully. Fix it.\n\n");
    prompt.push_str("**Previous code:**\n```javascript\n");
    prompt.push_str(outcome.code.trim());
    prompt.push_str("\n```\n\n");
    if let Some(kind) = outcome.failure_kind() {
        prompt.push_str(&format!("**Failure kind:** {}\n\n", kind));
    }
    prompt.push_str("**Error:**\n```\n");
    prompt.push_str(outcome.error_message().unwrap_or("unknown error"));
    prompt.push_str("\n```\n\n");

    prompt.push_str("## ORIGINAL REQUEST\n\n");
    prompt.push_str(base_prompt);
    prompt
}

/// Ask the reviewer to judge `code` against the request
pub fn build_reviewer_prompt(
    original_query: Option<&str>,
    requirements: &Requirements,
    code: &str,
) -> String {
    let mut prompt = String::new();

    if let Some(query) = original_query {
        prompt.push_str("## ORIGINAL QUESTION\n\n");
        prompt.push_str(query);
        prompt.push_str("\n\n");
    }

    prompt.push_str("## TASK\n\n");
    prompt.push_str(&requirements.task);
    prompt.push_str("\n\n");
    push_list(&mut prompt, "Expected Output", &requirements.outputs);
    push_list(&mut prompt, "Constraints", &requirements.constraints);

    prompt.push_str("## CODE UNDER REVIEW\n\n```javascript\n");
    prompt.push_str(code.trim());
    prompt.push_str("\n```\n\nRespond with the review JSON object only.");
    prompt
}

/// Ask the presenter to explain a successful run
pub fn build_presenter_prompt(original_query: Option<&str>, outcome: &ExecutionOutcome) -> String {
    let mut prompt = String::new();

    prompt.push_str("## ORIGINAL QUESTION\n\n");
    prompt.push_str(original_query.unwrap_or("(not recorded)"));
    prompt.push_str("\n\n## CODE\n\n```javascript\n");
    prompt.push_str(outcome.code.trim());
    prompt.push_str("\n```\n\n## OUTPUT\n\n");
    match outcome.return_value() {
        Some(value) => prompt.push_str(&value.to_string()),
        None => prompt.push_str("(no value)"),
    }
    prompt.push_str("\n\n## ERRORS\n\n");
    prompt.push_str(outcome.error_message().unwrap_or("None"));
    prompt.push_str("\n\nRespond with the presentation JSON object only.");
    prompt
}
