//! Selection and options pages
//!
//! Pages are produced by a [`TemplateRenderer`]. The built-in
//! [`HtmlRenderer`] writes plain HTML forms that post back to the page
//! they were served from.

use std::fmt::Write;

use crate::error::{DossierError, Result};
use crate::forms::{OptionsForm, Policy, ResourceDeclaration};
use crate::resolution::Choice;

/// A page to render
#[derive(Debug, Clone, Copy)]
pub enum View<'a> {
    Tenants {
        action: &'a str,
        choices: &'a [Choice],
    },
    Spawners {
        action: &'a str,
        choices: &'a [Choice],
    },
    Options {
        action: &'a str,
        form: &'a OptionsForm,
    },
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, view: View<'_>) -> Result<String>;
}

/// Minimal HTML escaping for text and attribute values
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer;

impl HtmlRenderer {
    fn page(title: &str, body: &str) -> String {
        format!(
            "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n</head>\n<body>\n<h1>{}</h1>\n{body}</body>\n</html>\n",
            escape_html(title),
            escape_html(title),
        )
    }

    fn choices(action: &str, field: &str, choices: &[Choice]) -> Result<String> {
        let mut body = String::new();
        write!(
            body,
            "<form method=\"post\" action=\"{}\">\n",
            escape_html(action)
        )
        .map_err(render_error)?;
        for (index, choice) in choices.iter().enumerate() {
            let checked = if index == 0 { " checked" } else { "" };
            write!(
                body,
                "<label><input type=\"radio\" name=\"{field}\" value=\"{}\"{checked}> <strong>{}</strong>",
                escape_html(&choice.slug),
                escape_html(choice.label()),
            )
            .map_err(render_error)?;
            if let Some(description) = &choice.description {
                write!(body, " <span>{}</span>", escape_html(description)).map_err(render_error)?;
            }
            body.push_str("</label><br>\n");
        }
        body.push_str("<button type=\"submit\">Continue</button>\n</form>\n");
        Ok(body)
    }

    fn resource_input(body: &mut String, resource: &ResourceDeclaration) -> std::fmt::Result {
        write!(
            body,
            "<label>{} ({}) <input type=\"number\" name=\"{}\"",
            escape_html(&resource.name),
            resource.unit,
            escape_html(&resource.name),
        )?;
        if let Some(min) = resource.min {
            write!(body, " min=\"{min}\"")?;
        }
        if let Some(max) = resource.max {
            write!(body, " max=\"{max}\"")?;
        }
        if let Some(default) = resource.default {
            write!(body, " value=\"{default}\"")?;
        }
        match resource.step {
            Some(step) => write!(body, " step=\"{step}\"")?,
            None => body.push_str(" step=\"any\""),
        }
        body.push_str("></label><br>\n");
        Ok(())
    }

    fn options(action: &str, form: &OptionsForm) -> Result<String> {
        let mut body = String::new();
        write!(
            body,
            "<form method=\"post\" action=\"{}\">\n",
            escape_html(action)
        )
        .map_err(render_error)?;

        match form.image_policy {
            Policy::Fixed => {}
            Policy::Manual => {
                write!(
                    body,
                    "<label>Image <input type=\"text\" name=\"image\" placeholder=\"{}\"></label><br>\n",
                    escape_html(&form.default_image)
                )
                .map_err(render_error)?;
            }
            Policy::Profiles => {
                body.push_str("<label>Profile <select name=\"profile\">\n");
                for profile in &form.profiles {
                    let selected = if profile.default { " selected" } else { "" };
                    write!(
                        body,
                        "<option value=\"{}\"{selected}>{}</option>\n",
                        escape_html(&profile.slug),
                        escape_html(&profile.display_name),
                    )
                    .map_err(render_error)?;
                }
                body.push_str("</select></label><br>\n");
            }
        }

        for resource in &form.resources {
            Self::resource_input(&mut body, resource).map_err(render_error)?;
        }

        body.push_str("<button type=\"submit\">Start</button>\n</form>\n");
        Ok(body)
    }
}

fn render_error(err: std::fmt::Error) -> DossierError {
    DossierError::Render(err.to_string())
}

impl TemplateRenderer for HtmlRenderer {
    fn render(&self, view: View<'_>) -> Result<String> {
        match view {
            View::Tenants { action, choices } => Ok(Self::page(
                "Select a tenant",
                &Self::choices(action, "tenant", choices)?,
            )),
            View::Spawners { action, choices } => Ok(Self::page(
                "Select a spawner",
                &Self::choices(action, "spawner", choices)?,
            )),
            View::Options { action, form } => {
                Ok(Self::page("Server options", &Self::options(action, form)?))
            }
        }
    }
}
