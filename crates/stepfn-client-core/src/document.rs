use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{DRAFT_STORAGE_KEY, Persistence};

pub const DEFAULT_OUTPUT_PLACEHOLDER: &str =
    "// Upon execution, the step function's output will appear here";

const DEFAULT_INPUT: &str = r#"{"a": 55, "b": 66}"#;

const DEFAULT_SCRIPT: &str = r#"
// This function is referenced in the definition on the left using "FunctionName": "sum"
const sum = input => input.First + input.Second;

// Likewise, this function is referenced in the definition on the left using "FunctionName": "unix"
function unix(input) {
    return Date.now();
}
"#;

const DEFAULT_DEFINITION: &str = r#"
{
  "StartAt": "First Unix date",
  "States": {
    "First Unix date": {
      "Type": "Task",
      "Resource": "arn:aws:states:::lambda:invoke",
      "Parameters": {
        "Payload.$": "$",
        "FunctionName": "unix"
      },
      "ResultSelector": {
        "First.$": "$.Payload"
      },
      "Next": "Second Unix date"
    },
    "Second Unix date": {
      "Type": "Task",
      "Resource": "arn:aws:states:::lambda:invoke",
      "Parameters": {
        "Payload.$": "$",
        "FunctionName": "unix"
      },
      "ResultPath": "$.Second",
      "Next": "Refactor"
    },
    "Refactor": {
      "Type": "Pass",
      "Parameters": {
        "First.$": "$.First",
        "Second.$": "$.Second.Payload"
      },
      "Next": "Sum them"
    },
    "Sum them": {
      "Type": "Task",
      "Resource": "arn:aws:states:::lambda:invoke",
      "Parameters": {
        "Payload.$": "$",
        "FunctionName": "sum"
      },
      "ResultSelector": {
        "Sum.$": "$.Payload"
      },
      "ResultPath": "$.Sum",
      "End": true
    }
  }
}
"#;

/// The editable triple, in the wire and draft-storage shape.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentSource {
    pub definition: String,
    pub script: String,
    pub input: String,
}

impl DocumentSource {
    /// The built-in example: two unix timestamps summed by a script function.
    #[must_use]
    pub fn example() -> Self {
        Self {
            definition: DEFAULT_DEFINITION.to_string(),
            script: DEFAULT_SCRIPT.to_string(),
            input: DEFAULT_INPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub definition: String,
    pub script: String,
    pub input: String,
    pub output: String,
    pub error: bool,
}

impl Document {
    #[must_use]
    pub fn from_source(source: DocumentSource) -> Self {
        Self {
            definition: source.definition,
            script: source.script,
            input: source.input,
            output: DEFAULT_OUTPUT_PLACEHOLDER.to_string(),
            error: false,
        }
    }

    #[must_use]
    pub fn source(&self) -> DocumentSource {
        DocumentSource {
            definition: self.definition.clone(),
            script: self.script.clone(),
            input: self.input.clone(),
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::from_source(DocumentSource::example())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Definition,
    Script,
    Input,
}

impl DocumentField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Script => "script",
            Self::Input => "input",
        }
    }
}

/// Sole owner of the working document and of the local draft slot.
#[derive(Debug)]
pub struct DocumentStore<P> {
    storage: P,
    document: Document,
}

impl<P: Persistence> DocumentStore<P> {
    pub fn new(storage: P) -> Self {
        Self {
            storage,
            document: Document::default(),
        }
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn edit(&mut self, field: DocumentField, value: String) {
        match field {
            DocumentField::Definition => self.document.definition = value,
            DocumentField::Script => self.document.script = value,
            DocumentField::Input => self.document.input = value,
        }
    }

    /// Replaces the triple and resets the output panel.
    pub fn replace_source(&mut self, source: DocumentSource) {
        self.document = Document::from_source(source);
    }

    pub fn reset_to_example(&mut self) {
        self.replace_source(DocumentSource::example());
    }

    pub fn set_output(&mut self, output: impl Into<String>, error: bool) {
        self.document.output = output.into();
        self.document.error = error;
    }

    /// Loads the local draft into the working document. Returns `false` when
    /// there is no usable draft; an undecodable draft is skipped, not fatal.
    pub fn restore_draft(&mut self) -> Result<bool, StorageError> {
        let Some(raw) = self.storage.get(DRAFT_STORAGE_KEY)? else {
            return Ok(false);
        };
        match serde_json::from_str::<DocumentSource>(&raw) {
            Ok(source) => {
                self.replace_source(source);
                Ok(true)
            }
            Err(error) => {
                tracing::warn!(%error, "Discarding undecodable local draft");
                Ok(false)
            }
        }
    }

    pub fn persist_draft(&self) -> Result<(), StorageError> {
        let encoded =
            serde_json::to_string(&self.document.source()).map_err(|error| StorageError::Encode {
                message: error.to_string(),
            })?;
        self.storage.set(DRAFT_STORAGE_KEY, &encoded)
    }

    pub fn clear_draft(&self) -> Result<(), StorageError> {
        self.storage.remove(DRAFT_STORAGE_KEY)
    }
}
