use crate::navigator::dom;

const SUCCESS_MARKERS: &[&str] = &[
    "thank you for applying",
    "thanks for applying",
    "application received",
    "application submitted",
    "application has been submitted",
    "successfully submitted",
    "we have received your application",
    "we've received your application",
];

const CHALLENGE_MARKERS: &[&str] = &[
    "captcha",
    "verify you are human",
    "verify that you are human",
    "verification code",
    "are you a robot",
];

const VALIDATION_MARKERS: &[&str] = &[
    "this field is required",
    "is required",
    "please correct",
    "please fix",
    "please complete",
    "invalid",
];

const INVALID_CONTROL_SELECTORS: &[&str] = &["[aria-invalid='true']", ".field-error", ".error-message"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostSubmit {
    /// The page says the application went through; carries the marker seen.
    Confirmed(String),
    Ambiguous(String),
}

/// Reads the page shown after the final submit click. Anything short of an
/// explicit confirmation is ambiguous.
pub fn classify_post_submit(html: &str) -> PostSubmit {
    let text = dom::page_text(html);
    if let Some(marker) = SUCCESS_MARKERS.iter().find(|m| text.contains(*m)) {
        return PostSubmit::Confirmed(marker.to_string());
    }
    if let Some(marker) = CHALLENGE_MARKERS.iter().find(|m| text.contains(*m)) {
        return PostSubmit::Ambiguous(format!(
            "a verification challenge appeared after submit ('{marker}')"
        ));
    }
    if let Some(marker) = VALIDATION_MARKERS.iter().find(|m| text.contains(*m)) {
        return PostSubmit::Ambiguous(format!("the form reported a validation problem ('{marker}')"));
    }
    if INVALID_CONTROL_SELECTORS.iter().any(|css| dom::exists(html, css)) {
        return PostSubmit::Ambiguous("the form marked a control as invalid".to_string());
    }
    PostSubmit::Ambiguous("no confirmation or error was shown after submit".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_page() {
        let html = "<html><body><h1>Thank you for applying!</h1></body></html>";
        assert_eq!(
            classify_post_submit(html),
            PostSubmit::Confirmed("thank you for applying".to_string())
        );
    }

    #[test]
    fn test_challenge_is_ambiguous() {
        let html = r#"<html><body><p>Please verify you are human</p></body></html>"#;
        assert!(matches!(classify_post_submit(html), PostSubmit::Ambiguous(d) if d.contains("verification")));
    }

    #[test]
    fn test_validation_errors_and_silence_are_ambiguous() {
        let html = r#"<html><body><form><input aria-invalid="true" name="email"></form></body></html>"#;
        assert!(matches!(classify_post_submit(html), PostSubmit::Ambiguous(d) if d.contains("invalid")));
        let html = "<html><body><p>Loading...</p></body></html>";
        assert!(matches!(classify_post_submit(html), PostSubmit::Ambiguous(d) if d.contains("no confirmation")));
    }
}
