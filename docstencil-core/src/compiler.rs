//! Template compilation.
//!
//! [`compile`] walks a parsed [`Template`] and builds the native document directly, asking the
//! [`Binder`] for each placeholder. Argument values are never re-parsed as text.

use bson::{Bson, Document};
use tracing::debug;

use crate::{
    argument::Argument,
    binder::Binder,
    error::{StencilError, StencilResult},
    marshal::Marshaller,
    query::Query,
    template::{Node, PlaceholderContext, Segment, Template},
};

/// Compiles `template` with `arguments` into a [`Query`].
///
/// The argument count is checked before anything is bound. Keys keep the order in which the
/// template writes them; a repeated key keeps its first position and its last value.
///
/// # Errors
///
/// - [`StencilError::ArgumentCountMismatch`] if `arguments` does not have one entry per
///   placeholder
/// - [`StencilError::InvalidArgumentType`] if an argument does not fit its placeholder, or a
///   template made of a lone placeholder is bound to something other than a document or array
/// - [`StencilError::Marshalling`] if an object argument cannot be marshalled
pub fn compile(template: &Template, arguments: &[Argument], marshaller: &dyn Marshaller) -> StencilResult<Query> {
    if arguments.len() != template.placeholder_count() {
        return Err(StencilError::ArgumentCountMismatch {
            template: template.source().to_string(),
            expected: template.placeholder_count(),
            actual: arguments.len(),
        });
    }

    debug!(
        template = template.source(),
        placeholders = template.placeholder_count(),
        "compiling template"
    );

    let compiler = Compiler {
        template,
        arguments,
        binder: Binder::new(template.source(), marshaller),
    };

    match compiler.render(template.root())? {
        root @ (Bson::Document(_) | Bson::Array(_)) => Ok(Query::new(root)),
        other => Err(StencilError::InvalidArgumentType {
            template: template.source().to_string(),
            index: 0,
            context: PlaceholderContext::Value,
            reason: format!(
                "a template made of a single placeholder needs a document or an array, got {:?}",
                other.element_type()
            ),
        }),
    }
}

struct Compiler<'a> {
    template: &'a Template,
    arguments: &'a [Argument],
    binder: Binder<'a>,
}

impl Compiler<'_> {
    fn render(&self, node: &Node) -> StencilResult<Bson> {
        match node {
            Node::Object(members) => {
                let mut document = Document::new();
                for (key, value) in members {
                    document.insert(self.render_segments(key)?, self.render(value)?);
                }
                Ok(Bson::Document(document))
            }
            Node::Array(items) => items
                .iter()
                .map(|item| self.render(item))
                .collect::<StencilResult<Vec<_>>>()
                .map(Bson::Array),
            Node::Literal(value) => Ok(value.clone()),
            Node::Placeholder(index) => self
                .binder
                .bind_value(&self.template.placeholders()[*index], &self.arguments[*index]),
            Node::Text(segments) => self.render_segments(segments).map(Bson::String),
            Node::Regex { pattern, options } => {
                let mut regex = Document::new();
                regex.insert("$regex", self.render_segments(pattern)?);
                if !options.is_empty() {
                    regex.insert("$options", options.as_str());
                }
                Ok(Bson::Document(regex))
            }
        }
    }

    fn render_segments(&self, segments: &[Segment]) -> StencilResult<String> {
        let mut text = String::new();
        for segment in segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Placeholder(index) => text.push_str(
                    &self
                        .binder
                        .bind_text(&self.template.placeholders()[*index], &self.arguments[*index])?,
                ),
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use bson::{doc, oid::ObjectId};
    use serde::Serialize;

    use super::*;
    use crate::{marshal::BsonMapper, params};

    fn compile_str(source: &str, arguments: Vec<Argument>) -> StencilResult<Query> {
        compile(&Template::parse(source).unwrap(), &arguments, &BsonMapper::new())
    }

    #[derive(Serialize)]
    struct Friend {
        name: String,
        age: i32,
    }

    #[test]
    fn test_value_substitution() {
        let query = compile_str("{name: #, age: {$gt: #}}", params!["Robert", 30]).unwrap();

        assert_eq!(query.to_document().unwrap(), doc! { "name": "Robert", "age": { "$gt": 30 } });
    }

    #[test]
    fn test_argument_count_is_checked_first() {
        for (arguments, actual) in [(params![], 0), (params![1, 2], 2)] {
            match compile_str("{a: #}", arguments) {
                Err(StencilError::ArgumentCountMismatch { expected, actual: got, .. }) => {
                    assert_eq!(expected, 1);
                    assert_eq!(got, actual);
                }
                other => panic!("unexpected result {other:?}"),
            }
        }

        // the mismatching type is never looked at
        assert!(matches!(
            compile_str("{#: 1}", params![doc! {}, 2]),
            Err(StencilError::ArgumentCountMismatch { .. })
        ));
    }

    #[test]
    fn test_key_order_is_preserved() {
        let query = compile_str("{c: #, a: #, b: #}", params![1, 2, 3]).unwrap();

        let keys: Vec<&String> = query.as_document().unwrap().keys().collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_duplicate_key_last_value_wins() {
        let query = compile_str("{a: 1, b: 2, a: #}", params![3]).unwrap();

        assert_eq!(query.to_document().unwrap(), doc! { "a": 3, "b": 2 });
    }

    #[test]
    fn test_zero_placeholders_is_idempotent() {
        let template = Template::parse("{status: 'active', $or: [{a: 1}, {b: /x/}]}").unwrap();
        let mapper = BsonMapper::new();

        let first = compile(&template, &[], &mapper).unwrap();
        let second = compile(&template, &[], &mapper).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str(), second.as_str());
    }

    #[test]
    fn test_object_and_document_arguments_nest() {
        let query = compile_str(
            "{$set: #, $push: {log: #}}",
            params![Argument::object(Friend { name: "Robert".into(), age: 30 }), doc! { "at": 1 }],
        )
        .unwrap();

        assert_eq!(
            query.to_document().unwrap(),
            doc! { "$set": { "name": "Robert", "age": 30 }, "$push": { "log": { "at": 1 } } }
        );
    }

    #[test]
    fn test_strings_are_not_reparsed() {
        let query = compile_str("{name: #}", params!["{$ne: 1}', x: '"]).unwrap();

        assert_eq!(query.to_document().unwrap(), doc! { "name": "{$ne: 1}', x: '" });
    }

    #[test]
    fn test_key_fragments_and_embedded_strings() {
        let query = compile_str(
            "{'address.#': #, items.#.qty: 1, name: 'jo#', bio: /^#/i, path: /a/}",
            params!["city", "Paris", 0, "hn", "Rob"],
        )
        .unwrap();

        assert_eq!(
            query.to_document().unwrap(),
            doc! {
                "address.city": "Paris",
                "items.0.qty": 1,
                "name": "john",
                "bio": { "$regex": "^Rob", "$options": "i" },
                "path": { "$regex": "a" },
            }
        );
    }

    #[test]
    fn test_key_fragment_rejects_documents() {
        assert!(matches!(
            compile_str("{#: 1}", params![doc! { "x": 1 }]),
            Err(StencilError::InvalidArgumentType { index: 0, context: PlaceholderContext::KeyFragment, .. })
        ));
    }

    #[test]
    fn test_id_marker_coercion() {
        let hex = "507f1f77bcf86cd799439011";
        let query = compile_str("{_id: #id}", params![hex]).unwrap();

        assert_eq!(
            query.to_document().unwrap().get("_id"),
            Some(&Bson::ObjectId(ObjectId::parse_str(hex).unwrap()))
        );
    }

    #[test]
    fn test_pipeline_template() {
        let query = compile_str("[{$match: {a: #}}, {$limit: #}]", params![1, 5]).unwrap();

        assert_eq!(
            query.to_pipeline().unwrap(),
            vec![doc! { "$match": { "a": 1 } }, doc! { "$limit": 5 }]
        );
    }

    #[test]
    fn test_lone_placeholder_needs_document() {
        assert_eq!(
            compile_str("#", params![doc! { "a": 1 }]).unwrap().to_document().unwrap(),
            doc! { "a": 1 }
        );
        assert!(matches!(
            compile_str("#", params!["a"]),
            Err(StencilError::InvalidArgumentType { .. })
        ));
    }
}
