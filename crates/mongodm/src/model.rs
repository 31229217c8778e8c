//! Document types
//!
//! A document type is a unit struct implementing [`Model`]. Its
//! [`Declaration`] is compiled into a [`DocumentClass`] the first time the
//! type is used; the result, success or failure, is cached for the life of
//! the process.
//!
//! ```ignore
//! struct User;
//!
//! #[async_trait]
//! impl Model for User {
//!     const NAME: &'static str = "User";
//!
//!     fn declaration() -> Declaration {
//!         Declaration::new()
//!             .field("name", FieldSpec::new(FieldType::String).default("my_default_name"))
//!             .field("age", FieldSpec::new(FieldType::Int).index(IndexKind::Ascending))
//!             .url("mongodb://localhost:27017")
//!     }
//!
//!     fn cell() -> &'static ClassCell {
//!         class_cell!()
//!     }
//! }
//! ```

use async_trait::async_trait;
use bson::Document as BsonDocument;
use mongodm_common::{MongoDmError, Result};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::collection::{ClassBinding, ClassConfig};
use crate::connection::ClientConfig;
use crate::document::Document;
use crate::driver::DatabaseClient;
use crate::registry::ClientRegistry;
use crate::schema::{FieldSpec, Schema};

/// Inheritance chains longer than this are treated as cycles
const MAX_INHERITANCE_DEPTH: usize = 32;

/// A document type
///
/// Hooks run around every [`Document::save`]. They are async; a hook with
/// nothing to await is simply an `async fn` that never suspends. Errors
/// returned from either hook propagate to the caller of `save`.
#[async_trait]
pub trait Model: Sized + Send + Sync + 'static {
    /// Type name used in messages and for the default collection name
    const NAME: &'static str;

    fn declaration() -> Declaration;

    /// Storage for the compiled class, normally `class_cell!()`
    fn cell() -> &'static ClassCell;

    /// The compiled class, built on first call
    fn class() -> Result<&'static DocumentClass> {
        Self::cell().get_or_compile::<Self>()
    }

    /// Runs before the write; the default stamps `createdAt`/`updatedAt`
    async fn pre_save(document: &mut Document<Self>) -> Result<()> {
        document.touch_timestamps()
    }

    /// Runs after a successful write
    async fn after_save(_document: &mut Document<Self>) -> Result<()> {
        Ok(())
    }
}

/// Lazily compiled [`DocumentClass`] of one model type
pub struct ClassCell(OnceLock<Result<DocumentClass>>);

impl ClassCell {
    pub const fn new() -> Self {
        Self(OnceLock::new())
    }

    pub fn get_or_compile<M: Model>(&'static self) -> Result<&'static DocumentClass> {
        match self.0.get_or_init(DocumentClass::compile::<M>) {
            Ok(class) => Ok(class),
            Err(err) => Err(err.clone()),
        }
    }
}

impl Default for ClassCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Expands to a `&'static ClassCell` private to the enclosing function
#[macro_export]
macro_rules! class_cell {
    () => {{
        static CELL: $crate::ClassCell = $crate::ClassCell::new();
        &CELL
    }};
}

#[derive(Clone, Copy)]
struct Parent {
    name: &'static str,
    declaration: fn() -> Declaration,
    compose: bool,
}

/// Builder describing a document type
#[derive(Clone, Default)]
pub struct Declaration {
    schema: Option<BsonDocument>,
    parent: Option<Parent>,
    abstract_base: bool,
    config: ClassConfig,
    client_config: Option<ClientConfig>,
    registry: Option<Arc<ClientRegistry>>,
    client: Option<Arc<dyn DatabaseClient>>,
}

impl Declaration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `declaration` as the raw schema
    ///
    /// Validation happens when the type is compiled, with the same rules for
    /// every declaration source.
    pub fn schema(mut self, declaration: BsonDocument) -> Self {
        self.schema = Some(declaration);
        self
    }

    /// Append or replace one field
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.schema
            .get_or_insert_with(BsonDocument::new)
            .insert(name.into(), spec.to_declaration());
        self
    }

    /// Reuse the schema of `P` when this declaration has none
    ///
    /// Connection settings other than the collection name are inherited
    /// too, unless set here.
    pub fn inherit<P: Model>(mut self) -> Self {
        self.parent = Some(Parent {
            name: P::NAME,
            declaration: P::declaration,
            compose: false,
        });
        self
    }

    /// Start from the schema of `P` and add or override fields
    pub fn extend<P: Model>(mut self) -> Self {
        self.parent = Some(Parent {
            name: P::NAME,
            declaration: P::declaration,
            compose: true,
        });
        self
    }

    /// Mark as a base type: never compiled or stored, only inherited from
    pub fn abstract_base(mut self) -> Self {
        self.abstract_base = true;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.client_name = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.url = Some(url.into());
        self
    }

    pub fn db_name(mut self, name: impl Into<String>) -> Self {
        self.config.db_name = Some(name.into());
        self
    }

    pub fn collection_name(mut self, name: impl Into<String>) -> Self {
        self.config.collection_name = Some(name.into());
        self
    }

    /// Overlay a loaded [`ClassConfig`]; fields it leaves unset are kept
    pub fn config(mut self, config: ClassConfig) -> Self {
        self.config = self.config.merged(config);
        self
    }

    /// Options for clients created implicitly for this type
    pub fn client_config(mut self, config: ClientConfig) -> Self {
        self.client_config = Some(config);
        self
    }

    /// Registry to create implicit clients in, instead of the global one
    pub fn registry(mut self, registry: Arc<ClientRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Pre-bound client; resolution never consults the registry
    pub fn client(mut self, client: Arc<dyn DatabaseClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn is_abstract(&self) -> bool {
        self.abstract_base
    }

    /// Fold the parent chain into a single declaration
    fn flatten(mut self, name: &str, depth: usize) -> Result<Self> {
        let Some(parent) = self.parent.take() else {
            return Ok(self);
        };
        if depth >= MAX_INHERITANCE_DEPTH {
            return Err(MongoDmError::Schema(format!(
                "'{}' has an inheritance chain deeper than {} (cycle through '{}'?)",
                name, MAX_INHERITANCE_DEPTH, parent.name
            )));
        }
        let base = (parent.declaration)().flatten(parent.name, depth + 1)?;

        self.schema = match (self.schema, base.schema) {
            (Some(own), Some(mut inherited)) if parent.compose => {
                for (key, value) in own {
                    inherited.insert(key, value);
                }
                Some(inherited)
            }
            (Some(own), _) => Some(own),
            (None, inherited) => inherited,
        };
        self.config = ClassConfig {
            collection_name: None,
            ..base.config
        }
        .merged(self.config);
        self.client_config = self.client_config.or(base.client_config);
        self.registry = self.registry.or(base.registry);
        self.client = self.client.or(base.client);
        Ok(self)
    }
}

impl fmt::Debug for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Declaration")
            .field("schema", &self.schema)
            .field("parent", &self.parent.map(|p| p.name))
            .field("abstract_base", &self.abstract_base)
            .field("config", &self.config)
            .field("bound", &self.client.is_some())
            .finish()
    }
}

/// Compiled document type: validated schema plus collection binding
#[derive(Debug)]
pub struct DocumentClass {
    name: &'static str,
    schema: Schema,
    binding: ClassBinding,
}

impl DocumentClass {
    fn compile<M: Model>() -> Result<Self> {
        let declaration = M::declaration().flatten(M::NAME, 0)?;
        if declaration.abstract_base {
            return Err(MongoDmError::Schema(format!(
                "'{}' is an abstract document and has no collection",
                M::NAME
            )));
        }

        let schema = match &declaration.schema {
            Some(raw) => Schema::from_declaration(raw)?,
            None => Schema::empty(),
        };
        let binding = ClassBinding::new(
            M::NAME,
            declaration.config,
            declaration.client,
            declaration.registry.unwrap_or_else(ClientRegistry::global),
            declaration.client_config.unwrap_or_default(),
        )?;

        debug!(
            document = M::NAME,
            fields = schema.len(),
            collection = %binding.collection_name(),
            "Compiled document class"
        );
        Ok(Self {
            name: M::NAME,
            schema,
            binding,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn binding(&self) -> &ClassBinding {
        &self.binding
    }
}
