/// Data-shaping operations a Transform node can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformKind {
    /// `fields`: object of output field -> template string.
    Map,
    /// `fields`: list of field names copied from the merged upstream outputs.
    Pick,
    /// Union of every live predecessor's output, later edges win.
    Merge,
    /// `input`: template resolving to JSON text; its object keys become fields.
    JsonParse,
    /// `input`: template whose resolved text is published as `json`.
    JsonStringify,
}

impl TransformKind {
    /// Accepts canonical ids and the labels older graphs were saved with.
    pub fn parse(id: &str) -> Option<Self> {
        match id {
            "map" | "Map Data" => Some(TransformKind::Map),
            "pick" | "Pick Fields" => Some(TransformKind::Pick),
            "merge" | "Merge Data" => Some(TransformKind::Merge),
            "json-parse" | "Parse JSON" => Some(TransformKind::JsonParse),
            "json-stringify" | "Stringify JSON" => Some(TransformKind::JsonStringify),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            TransformKind::Map => "map",
            TransformKind::Pick => "pick",
            TransformKind::Merge => "merge",
            TransformKind::JsonParse => "json-parse",
            TransformKind::JsonStringify => "json-stringify",
        }
    }

    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            TransformKind::Map | TransformKind::Pick => &["fields"],
            TransformKind::Merge => &[],
            TransformKind::JsonParse | TransformKind::JsonStringify => &["input"],
        }
    }
}
