//! Template rendering utilities using Tera

use serde::Serialize;
use tera::{Context, Tera};

use crate::Result;

/// Render a template string against any serializable value.
///
/// Autoescaping is off: output goes to chat markdown, not HTML.
pub fn render_template<T: Serialize>(template: &str, value: &T) -> Result<String> {
    let context = Context::from_serialize(value)?;
    Ok(Tera::one_off(template, &context, false)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_template() {
        let context = json!({
            "name": "backup",
            "namespace": "default",
        });

        let result = render_template("Job {{ name }} in {{ namespace }}", &context).unwrap();
        assert_eq!(result, "Job backup in default");
    }

    #[test]
    fn test_empty_strings_are_falsy() {
        let context = json!({ "cron_job_name": "" });
        let result = render_template("{% if cron_job_name %}cron{% endif %}", &context).unwrap();
        assert_eq!(result, "");
    }

    #[test]
    fn test_no_html_escaping() {
        let context = json!({ "log": "<https://files/log|log>" });
        let result = render_template("{{ log }}", &context).unwrap();
        assert_eq!(result, "<https://files/log|log>");
    }

    #[test]
    fn test_context_must_be_object() {
        assert!(render_template("{{ x }}", &"plain").is_err());
    }
}
