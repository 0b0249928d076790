use trellis_core::{GraphElement, Schema, Tag, Uri, UserUris};

use super::{ensure_state, ElementCreation, ElementState, GraphContext};
use crate::error::{GraphError, Result};
use crate::store::{ElementPatch, Mutation, WriteBatch};

/// A schema and the properties it owns. Schemas sit outside the vertex/edge
/// topology, so nothing here touches neighbor counters or vertex locks.
pub struct SchemaOperator {
    ctx: GraphContext,
    uri: Uri,
    state: ElementState,
}

impl SchemaOperator {
    pub fn for_new(ctx: GraphContext, owner: &UserUris) -> Self {
        Self {
            ctx,
            uri: owner.generate_schema_uri(),
            state: ElementState::Uncreated,
        }
    }

    pub fn existing(ctx: GraphContext, uri: Uri) -> Self {
        Self {
            ctx,
            uri,
            state: ElementState::Created,
        }
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn state(&self) -> ElementState {
        self.state
    }

    pub async fn create(&mut self, creation: ElementCreation) -> Result<Schema> {
        ensure_state(&self.uri, self.state, ElementState::Uncreated)?;

        let mut schema = Schema::new(self.uri.clone());
        creation.apply_to(&mut schema.element);
        let mut batch = WriteBatch::new();
        batch.push(Mutation::CreateSchema(schema.clone()));
        self.ctx.store().apply(batch).await?;

        self.state = ElementState::Created;
        tracing::info!(uri = %self.uri, "Created schema");
        Ok(schema)
    }

    /// The schema with its properties and every tag.
    pub async fn read(&self) -> Result<Schema> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx
            .store()
            .schemas(std::slice::from_ref(&self.uri))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GraphError::not_found(&self.uri))
    }

    /// Add a property minted in the schema owner's namespace.
    pub async fn add_property(&self, creation: ElementCreation) -> Result<GraphElement> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;

        let owner = UserUris::for_username(self.uri.owner_username())?;
        let mut property = GraphElement::new(owner.generate_property_uri());
        creation.apply_to(&mut property);

        let mut batch = WriteBatch::new();
        batch.push(Mutation::AddSchemaProperty {
            schema: self.uri.clone(),
            property: property.clone(),
        });
        self.ctx.store().apply(batch).await?;

        tracing::info!(schema = %self.uri, property = %property.uri, "Added schema property");
        Ok(property)
    }

    pub async fn update(&self, patch: ElementPatch) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.update_element(&self.uri, patch).await
    }

    pub async fn update_property(&self, property: &Uri, patch: ElementPatch) -> Result<()> {
        self.ensure_owns(property).await?;
        self.ctx.update_element(property, patch).await
    }

    pub async fn add_tag(&self, tag: Tag) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.attach_tag(&self.uri, tag).await
    }

    pub async fn remove_tag(&self, tag: &Uri) -> Result<()> {
        ensure_state(&self.uri, self.state, ElementState::Created)?;
        self.ctx.detach_tag(&self.uri, tag).await
    }

    pub async fn add_property_tag(&self, property: &Uri, tag: Tag) -> Result<()> {
        self.ensure_owns(property).await?;
        self.ctx.attach_tag(property, tag).await
    }

    async fn ensure_owns(&self, property: &Uri) -> Result<()> {
        if self.read().await?.property(property).is_none() {
            return Err(GraphError::InvalidArgument {
                argument: property.to_string(),
                reason: format!("not a property of {}", self.uri),
            });
        }
        Ok(())
    }
}
