//! Parameter binding.
//!
//! The [`Binder`] renders one argument for one placeholder. What it produces depends on the
//! placeholder's [`PlaceholderContext`]:
//!
//! | context | accepted arguments | rendered as |
//! |---------|--------------------|-------------|
//! | `Value` | any | the value, a nested copy of the document, or the marshalled object |
//! | `ObjectId` | ObjectId, 24-char hex string, 12 bytes | an ObjectId |
//! | `KeyFragment` | string, integer | text spliced into the key |
//! | `Embedded` | string, number, boolean, ObjectId | text spliced into the string |
//!
//! Binding never modifies the caller's arguments: documents are copied and objects are only
//! read by the marshaller.

use bson::{Bson, oid::ObjectId};

use crate::{
    argument::Argument,
    error::{StencilError, StencilResult},
    marshal::Marshaller,
    template::{Placeholder, PlaceholderContext},
};

/// The rendering of one argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// A typed value for a value or id placeholder.
    Value(Bson),
    /// Text for a key fragment or embedded placeholder.
    Text(String),
}

/// Renders arguments for the placeholders of one template.
pub struct Binder<'a> {
    template: &'a str,
    marshaller: &'a dyn Marshaller,
}

impl<'a> Binder<'a> {
    /// Creates a binder for the template with the given source text.
    pub fn new(template: &'a str, marshaller: &'a dyn Marshaller) -> Self {
        Self { template, marshaller }
    }

    /// Renders `argument` for `placeholder`.
    ///
    /// # Errors
    ///
    /// Returns [`StencilError::InvalidArgumentType`] when the argument does not fit the
    /// placeholder context, and passes marshalling errors through unchanged.
    pub fn bind(&self, placeholder: &Placeholder, argument: &Argument) -> StencilResult<Fragment> {
        match placeholder.context {
            PlaceholderContext::Value | PlaceholderContext::ObjectId => {
                self.bind_value(placeholder, argument).map(Fragment::Value)
            }
            PlaceholderContext::KeyFragment | PlaceholderContext::Embedded => {
                self.bind_text(placeholder, argument).map(Fragment::Text)
            }
        }
    }

    pub(crate) fn bind_value(&self, placeholder: &Placeholder, argument: &Argument) -> StencilResult<Bson> {
        if placeholder.context == PlaceholderContext::ObjectId {
            return self.bind_object_id(placeholder, argument).map(Bson::ObjectId);
        }

        match argument {
            Argument::Primitive(value) | Argument::Document(value) => Ok(value.clone()),
            Argument::Object(object) => self
                .marshaller
                .marshal(object.as_ref())
                .map(Bson::Document),
        }
    }

    pub(crate) fn bind_text(&self, placeholder: &Placeholder, argument: &Argument) -> StencilResult<String> {
        let value = match argument {
            Argument::Primitive(value) => value,
            other => {
                return Err(self.mismatch(placeholder, format!("{} has no string form", other.kind())));
            }
        };

        match (placeholder.context, value) {
            (_, Bson::String(text)) => Ok(text.clone()),
            (_, Bson::Int32(n)) => Ok(n.to_string()),
            (_, Bson::Int64(n)) => Ok(n.to_string()),
            (PlaceholderContext::Embedded, Bson::Double(n)) => Ok(n.to_string()),
            (PlaceholderContext::Embedded, Bson::Boolean(b)) => Ok(b.to_string()),
            (PlaceholderContext::Embedded, Bson::ObjectId(oid)) => Ok(oid.to_hex()),
            (PlaceholderContext::KeyFragment, other) => Err(self.mismatch(
                placeholder,
                format!("key fragments accept strings and integers, got {:?}", other.element_type()),
            )),
            (_, other) => Err(self.mismatch(
                placeholder,
                format!("{:?} has no string form", other.element_type()),
            )),
        }
    }

    fn bind_object_id(&self, placeholder: &Placeholder, argument: &Argument) -> StencilResult<ObjectId> {
        match argument {
            Argument::Primitive(Bson::ObjectId(oid)) => Ok(*oid),
            Argument::Primitive(Bson::String(hex)) => ObjectId::parse_str(hex)
                .map_err(|_| self.mismatch(placeholder, format!("'{hex}' is not a valid object id"))),
            Argument::Primitive(Bson::Binary(binary)) => <[u8; 12]>::try_from(binary.bytes.as_slice())
                .map(ObjectId::from_bytes)
                .map_err(|_| {
                    self.mismatch(
                        placeholder,
                        format!("object ids are 12 bytes long, got {}", binary.bytes.len()),
                    )
                }),
            Argument::Primitive(other) => Err(self.mismatch(
                placeholder,
                format!("{:?} cannot be read as an object id", other.element_type()),
            )),
            other => Err(self.mismatch(
                placeholder,
                format!("{} cannot be read as an object id", other.kind()),
            )),
        }
    }

    fn mismatch(&self, placeholder: &Placeholder, reason: String) -> StencilError {
        StencilError::InvalidArgumentType {
            template: self.template.to_string(),
            index: placeholder.index,
            context: placeholder.context,
            reason,
        }
    }
}
