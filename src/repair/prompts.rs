pub const SYSTEM_PROMPT: &str = r#"You are a Python bug-fixing assistant. Your job is to fix exactly one function.
Return ONLY a single fenced Python code block that contains the full corrected function.
Keep the same function name and parameters. Do not add prints or extra top-level code.
If you use typing features (e.g., List, Tuple), include the necessary imports.
Respect the intended return type: if a float is expected, do not return booleans, etc."#;

/// First-attempt prompt built from the task itself.
pub fn solve_prompt(imports: &str, buggy_body: &str, entry_point: &str, declaration: &str) -> String {
    format!(
        "Fix the function `{entry_point}` so all tests pass.\n\n\
         You may use these imports (optional):\n{imports}\n\n\
         Function declaration (for reference):\n{declaration}\n\n\
         Buggy function body (for reference):\n{buggy_body}\n\n\
         Return the full corrected function in ONE fenced Python code block, with any needed imports.\n\
         Do not output any explanations.\n",
        entry_point = entry_point,
        imports = or_placeholder(imports, "(none)"),
        declaration = or_placeholder(declaration, "(missing)"),
        buggy_body = or_placeholder(buggy_body, "(missing)"),
    )
}

/// Follow-up prompt that feeds the last failure back.
pub fn reflect_prompt(diagnostic: &str, previous_code: &str) -> String {
    format!(
        "Your previous attempt did not pass the tests.\n\n\
         Here is the error trace:\n{diagnostic}\n\n\
         Here is your previous function:\n{previous_code}\n\n\
         Please return an improved, fully corrected version of the SAME function (same name & signature).\n\
         Return ONLY one fenced Python code block. Include any needed imports inside the block.\n",
        diagnostic = or_placeholder(diagnostic, "(no error?)"),
        previous_code = previous_code,
    )
}

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}
