use crate::AuditContext;

pub const SYSTEM_PROMPT: &str = "You are an automated verifier. Return ONLY a single JSON object. \
Do NOT include any surrounding commentary.";

/// Deterministic user prompt embedding the task goal, the message under
/// audit, and the strict output schema with the allowed action grammar.
pub fn build_user_prompt(ctx: &AuditContext) -> String {
    format!(
        r#"Context:
- task: {task}
- sender: {sender}
- recipient: {recipient}
- agent_message: {message}

Instructions:
1) Decide if the agent_message is correct and relevant to the task.
2) Return JSON with fields:
   - verdict: "pass" or "fail"
   - confidence: number between 0.0 and 1.0
   - reason: short explanation why pass or fail
   - suggested_actions: array of strings. Valid actions:
       - "modify_agent_system_prompt: <instruction>"
       - "add_agent: <role name> : <short description>"
       - "remove_agent: <agent name>"
       - "request_credential: <provider> : <reason>"
       - "request_references"
       - "reduce_temperature"
       - "increase_temperature"
   - patch_for_agent: optional string (new system prompt)
3) Only output valid JSON (first character must be `{{` and last `}}`)."#,
        task = ctx.task,
        sender = ctx.sender,
        recipient = ctx.recipient,
        message = ctx.content,
    )
}
