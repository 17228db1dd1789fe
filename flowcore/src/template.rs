//! Liquid rendering of plugin URL and header templates

use liquid::{Object, Parser};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while rendering a template
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    /// The liquid parser could not be created
    #[error("Failed to build template parser: {0}")]
    Parser(String),
    /// The template source is not valid liquid
    #[error("Invalid template '{template}': {message}")]
    Parse {
        /// Template source
        template: String,
        /// Parser message
        message: String,
    },
    /// The render data is not a JSON object
    #[error("Template data must be an object: {0}")]
    Data(String),
    /// Rendering failed
    #[error("Failed to render template '{template}': {message}")]
    Render {
        /// Template source
        template: String,
        /// Renderer message
        message: String,
    },
}

/// Liquid template bound to its parser
pub struct Template {
    parser: Parser,
    template_str: String,
}

impl Template {
    /// Parse `template_str`, failing on invalid liquid
    pub fn new(template_str: &str) -> Result<Self, TemplateError> {
        let parser = default_parser()?;
        parser.parse(template_str).map_err(|e| TemplateError::Parse {
            template: template_str.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            parser,
            template_str: template_str.to_string(),
        })
    }

    /// Render against a JSON object
    pub fn render(&self, data: &Value) -> Result<String, TemplateError> {
        let template = self
            .parser
            .parse(&self.template_str)
            .map_err(|e| TemplateError::Parse {
                template: self.template_str.clone(),
                message: e.to_string(),
            })?;
        let object = to_liquid_object(data)?;

        template.render(&object).map_err(|e| TemplateError::Render {
            template: self.template_str.clone(),
            message: e.to_string(),
        })
    }

    /// Template source
    pub fn source(&self) -> &str {
        &self.template_str
    }
}

/// Render `template_str` once against `data`
///
/// Strings without liquid markup are returned untouched.
pub fn render_template(template_str: &str, data: &Value) -> Result<String, TemplateError> {
    if !template_str.contains("{{") && !template_str.contains("{%") {
        return Ok(template_str.to_string());
    }
    Template::new(template_str)?.render(data)
}

fn default_parser() -> Result<Parser, TemplateError> {
    liquid::ParserBuilder::with_stdlib()
        .build()
        .map_err(|e| TemplateError::Parser(e.to_string()))
}

fn to_liquid_object(data: &Value) -> Result<Object, TemplateError> {
    let mut object = Object::new();
    match data {
        Value::Object(map) => {
            for (key, value) in map {
                let value = liquid::model::to_value(value).map_err(|e| TemplateError::Data(e.to_string()))?;
                object.insert(key.clone().into(), value);
            }
            Ok(object)
        }
        Value::Null => Ok(object),
        other => Err(TemplateError::Data(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_nested_values() {
        let data = json!({"entity": {"id": "e-1"}, "secrets": {"TOKEN": "t0k"}});
        assert_eq!(
            render_template("https://api.example/{{ entity.id }}?t={{ secrets.TOKEN }}", &data).unwrap(),
            "https://api.example/e-1?t=t0k"
        );
    }

    #[test]
    fn test_plain_string_is_untouched() {
        assert_eq!(render_template("https://static", &json!({})).unwrap(), "https://static");
    }

    #[test]
    fn test_filters_from_stdlib() {
        let data = json!({"name": "ada"});
        assert_eq!(render_template("{{ name | upcase }}", &data).unwrap(), "ADA");
    }

    #[test]
    fn test_invalid_template() {
        let result = Template::new("{% if %}");
        assert!(matches!(result, Err(TemplateError::Parse { .. })));
    }

    #[test]
    fn test_non_object_data_is_rejected() {
        let template = Template::new("{{ x }}").unwrap();
        assert!(matches!(template.render(&json!([1])), Err(TemplateError::Data(_))));
    }
}
