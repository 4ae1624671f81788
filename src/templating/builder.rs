use std::borrow;

use include_dir::{include_dir, Dir};
use liquid::Template;

use super::liquid_exts::{JsonFilterParser, ScriptJsonFilterParser};
use crate::errors::{AccessGraphError, ErrorLayer, Result};

static TEMPLATE_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/templates");

#[derive(Default, Debug, Clone, Copy)]
struct StaticTemplateSource;

impl liquid::partials::PartialSource for StaticTemplateSource {
    fn contains(&self, name: &str) -> bool {
        TEMPLATE_DIR.get_file(name).is_some()
    }

    fn names(&self) -> Vec<&str> {
        TEMPLATE_DIR
            .files()
            .filter_map(|f| f.path().to_str())
            .collect()
    }

    fn try_get<'a>(&'a self, name: &str) -> Option<borrow::Cow<'a, str>> {
        match TEMPLATE_DIR.get_file(name) {
            Some(file) => file.contents_utf8().map(borrow::Cow::from),
            _ => None,
        }
    }
}

pub fn build_and_parse(s: &str) -> Result<Template> {
    let template = liquid::ParserBuilder::with_stdlib()
        .filter(JsonFilterParser)
        .filter(ScriptJsonFilterParser)
        .partials(liquid::partials::LazyCompiler::<StaticTemplateSource>::empty())
        .build()?
        .parse(s)?;
    Ok(template)
}

fn bundled_template(name: &str) -> Result<&'static str> {
    TEMPLATE_DIR
        .get_file(name)
        .and_then(|f| f.contents_utf8())
        .ok_or_else(|| {
            AccessGraphError::sticky(
                ErrorLayer::ConfigLayer,
                format!("Missing bundled template {}", name),
            )
        })
}

pub fn build_and_parse_permission_graph() -> Result<Template> {
    build_and_parse(bundled_template("permission_graph.liquid")?)
}

#[test]
fn test_bundled_templates_parse() {
    assert!(build_and_parse_permission_graph().is_ok());
    assert!(bundled_template("nope.liquid").is_err());
}
