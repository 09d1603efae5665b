use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Literal document delimiter. The split is textual, not YAML-stream aware.
pub const DOCUMENT_DELIMITER: &str = "---";

/// Key whose values are collected as image references.
pub const IMAGE_KEY: &str = "image";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read manifest {}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("document #{index} is not valid YAML")]
    Yaml {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("`image` in document #{index} holds a {kind}, expected a string")]
    TypeMismatch { index: usize, kind: &'static str },
}

/// A scalar leaf of a parsed document.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    /// Kept in its YAML text form (`3.18`, `42`).
    Number(String),
    String(String),
}

/// Parsed document as a tree of mappings, sequences and scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Sequence(Vec<Node>),
    /// Entries in document order.
    Mapping(Vec<(Node, Node)>),
}

impl Node {
    fn kind(&self) -> &'static str {
        match self {
            Node::Scalar(_) => "scalar",
            Node::Sequence(_) => "sequence",
            Node::Mapping(_) => "mapping",
        }
    }

    fn is_key(&self, name: &str) -> bool {
        matches!(self, Node::Scalar(Scalar::String(s)) if s == name)
    }
}

impl From<serde_yaml::Value> for Node {
    fn from(value: serde_yaml::Value) -> Self {
        use serde_yaml::Value;

        match value {
            Value::Null => Node::Scalar(Scalar::Null),
            Value::Bool(b) => Node::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Node::Scalar(Scalar::Number(n.to_string())),
            Value::String(s) => Node::Scalar(Scalar::String(s)),
            Value::Sequence(items) => Node::Sequence(items.into_iter().map(Node::from).collect()),
            Value::Mapping(map) => Node::Mapping(
                map.into_iter()
                    .map(|(k, v)| (Node::from(k), Node::from(v)))
                    .collect(),
            ),
            // `!Tag value` keeps only the value
            Value::Tagged(tagged) => Node::from(tagged.value),
        }
    }
}

/// Read the whole manifest as text.
pub fn load(path: &Path) -> Result<String, ManifestError> {
    std::fs::read_to_string(path).map_err(|source| ManifestError::Unreadable {
        path: path.to_path_buf(),
        source,
    })
}

/// Split on every literal `---`, including ones inside scalars or comments.
pub fn split_documents(text: &str) -> Vec<&str> {
    text.split(DOCUMENT_DELIMITER).collect()
}

/// Parse one chunk. Whitespace-only chunks (e.g. before a leading `---`)
/// become a null scalar without invoking the parser.
pub fn parse_document(index: usize, chunk: &str) -> Result<Node, ManifestError> {
    if chunk.trim().is_empty() {
        return Ok(Node::Scalar(Scalar::Null));
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(chunk).map_err(|source| ManifestError::Yaml { index, source })?;
    Ok(Node::from(value))
}

/// Collect every value stored under an `image` key, at any depth, in
/// depth-first pre-order. Matched values are still descended into.
pub fn find_images(node: &Node, index: usize) -> Result<Vec<String>, ManifestError> {
    let mut found = Vec::new();
    visit(node, index, &mut found)?;
    Ok(found)
}

fn visit(node: &Node, index: usize, found: &mut Vec<String>) -> Result<(), ManifestError> {
    match node {
        Node::Scalar(_) => {}
        Node::Sequence(items) => {
            for item in items {
                visit(item, index, found)?;
            }
        }
        Node::Mapping(entries) => {
            for (key, value) in entries {
                if key.is_key(IMAGE_KEY) {
                    if let Some(reference) = image_value(value, index)? {
                        found.push(reference);
                    }
                }
                visit(value, index, found)?;
            }
        }
    }
    Ok(())
}

/// Scalars are coerced to text; null and empty strings carry no reference.
fn image_value(value: &Node, index: usize) -> Result<Option<String>, ManifestError> {
    match value {
        Node::Scalar(Scalar::Null) => Ok(None),
        Node::Scalar(Scalar::String(s)) if s.trim().is_empty() => Ok(None),
        Node::Scalar(Scalar::String(s)) => Ok(Some(s.clone())),
        Node::Scalar(Scalar::Number(n)) => Ok(Some(n.clone())),
        Node::Scalar(Scalar::Bool(b)) => Ok(Some(b.to_string())),
        other => Err(ManifestError::TypeMismatch {
            index,
            kind: other.kind(),
        }),
    }
}

/// Every image reference in the manifest text, in document order, with
/// duplicates.
pub fn collect_images(text: &str) -> Result<Vec<String>, ManifestError> {
    let mut images = Vec::new();
    for (index, chunk) in split_documents(text).into_iter().enumerate() {
        let doc = parse_document(index, chunk)?;
        let matches = find_images(&doc, index)?;
        log::debug!("document #{index}: {} image reference(s)", matches.len());
        images.extend(matches);
    }
    Ok(images)
}

/// Unique references keyed by the full string, in lexicographic order.
pub fn unique_images(images: Vec<String>) -> BTreeSet<String> {
    images.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images_of(text: &str) -> Vec<String> {
        collect_images(text).unwrap()
    }

    #[test]
    fn split_is_purely_textual() {
        let parts = split_documents("a: 1\n---\nb: \"x---y\"\n");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "a: 1\n");
        assert_eq!(parts[2], "y\"\n");
    }

    #[test]
    fn finds_nested_images_in_pre_order() {
        let text = r#"
kind: Deployment
image: top:1
spec:
  template:
    spec:
      initContainers:
        - name: init
          image: busybox:1.36
      containers:
        - name: app
          image: registry.example.com/team/app:1.2
        - name: sidecar
          image: envoy:v1
"#;
        assert_eq!(
            images_of(text),
            vec![
                "top:1",
                "busybox:1.36",
                "registry.example.com/team/app:1.2",
                "envoy:v1"
            ]
        );
    }

    #[test]
    fn leading_and_trailing_delimiters_are_skipped() {
        let text = "---\nimage: a:1\n---\n\n---\n";
        assert_eq!(images_of(text), vec!["a:1"]);
    }

    #[test]
    fn manifest_without_images_yields_nothing() {
        let text = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n---\nkind: ConfigMap\n";
        assert!(images_of(text).is_empty());
    }

    #[test]
    fn duplicates_across_documents_collapse() {
        let text = r#"
spec: {containers: [{image: "alpine:3.18"}]}
---
image: "alpine:3.18"
"#;
        let all = images_of(text);
        assert_eq!(all.len(), 2);

        let unique = unique_images(all);
        assert_eq!(unique.into_iter().collect::<Vec<_>>(), vec!["alpine:3.18"]);
    }

    #[test]
    fn unique_keys_on_full_reference() {
        let unique = unique_images(vec![
            "nginx:1.25".into(),
            "nginx:1.24".into(),
            "nginx:1.25".into(),
        ]);
        assert_eq!(
            unique.into_iter().collect::<Vec<_>>(),
            vec!["nginx:1.24", "nginx:1.25"]
        );
    }

    #[test]
    fn scalar_values_are_coerced_and_nulls_skipped() {
        let text = "a:\n  image: 42\nb:\n  image: true\nc:\n  image:\nd:\n  image: \"\"\n";
        assert_eq!(images_of(text), vec!["42", "true"]);
    }

    #[test]
    fn tagged_values_are_unwrapped() {
        assert_eq!(images_of("image: !ref alpine:3.18\n"), vec!["alpine:3.18"]);
    }

    #[test]
    fn collection_value_is_a_type_mismatch() {
        let text = "kind: Pod\n---\nimage:\n  repository: nginx\n  tag: \"1.25\"\n";
        let err = collect_images(text).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::TypeMismatch {
                index: 1,
                kind: "mapping"
            }
        ));
    }

    #[test]
    fn invalid_yaml_reports_document_index() {
        let text = "image: ok:1\n---\nkey: [unclosed\n";
        let err = collect_images(text).unwrap_err();
        assert!(matches!(err, ManifestError::Yaml { index: 1, .. }));
    }

    #[test]
    fn only_the_exact_key_matches() {
        let text = "imagePullPolicy: Always\nimages: [\"a:1\"]\nImage: b:1\nspec: {image: \"c:1\"}\n";
        assert_eq!(images_of(text), vec!["c:1"]);
    }

    #[test]
    fn load_missing_file_is_unreadable() {
        let err = load(Path::new("/nonexistent/stow/manifest.yaml")).unwrap_err();
        assert!(matches!(err, ManifestError::Unreadable { .. }));
    }
}
