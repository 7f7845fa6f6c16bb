// Cross-cutting prompt fragments. Each component that calls the LLM keeps its
// own prompts.rs next to it and composes these in.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Every answer must be traceable to supplied evidence.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every answer you give must be supported by at least one of the \
    evidence passages provided, and you must cite the ids of the passages you used. \
    Do NOT infer, interpolate, or invent details about the candidate. \
    If the evidence does not support an answer, say you cannot answer.";

/// Self-identification and consent are the candidate's call, never the model's.
pub const SENSITIVE_INSTRUCTION: &str = "\
    CRITICAL: Never answer questions about gender, ethnicity, race, disability, \
    veteran status, sexual orientation, religion, age, or any consent or privacy \
    agreement. Always return cannot_answer for these.";
