//! Builds the normalized metadata model from declarative argument records.
//!
//! The builder runs once per connection, at connect time. Any unresolved
//! type, ambiguous ownership, missing inverse, or naming conflict fails the
//! whole build; no partial metadata is ever returned.
//!
//! Build passes:
//!
//! 1. per-entity column collection (embedded flattening included),
//! 2. relation resolution (inverse pairing, ownership validation, foreign
//!    key and junction synthesis),
//! 3. assembly (single-table-inheritance flattening, tree auxiliaries,
//!    index resolution, invariant checks).

use std::collections::HashMap;
use std::sync::Arc;

use ferrite_core::{OrmError, OrmResult};

use super::args::{ColumnArgs, EntityArgs, MetadataRegistry, RelationArgs};
use super::model::{
    ColumnMetadata, EntityMetadata, IndexMetadata, JoinColumnSpec, JoinTableSpec,
    MetadataCollection, RelationMetadata,
};
use super::types::{ColumnType, GeneratedKind, InheritancePattern, PropertyKind, RelationKind};
use crate::naming::NamingStrategy;

/// In-progress metadata for one entity while the build runs.
struct EntityDraft {
    args: EntityArgs,
    table_name: String,
    columns: Vec<ColumnMetadata>,
    relations: Vec<RelationMetadata>,
}

/// Builds a [`MetadataCollection`] from a [`MetadataRegistry`].
pub struct MetadataBuilder<'a> {
    registry: &'a MetadataRegistry,
    naming: &'a dyn NamingStrategy,
    connection: String,
}

impl<'a> MetadataBuilder<'a> {
    /// Creates a builder for the given registry and naming strategy.
    pub fn new(
        registry: &'a MetadataRegistry,
        naming: &'a dyn NamingStrategy,
        connection: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            naming,
            connection: connection.into(),
        }
    }

    /// Runs the build.
    ///
    /// # Errors
    ///
    /// Any metadata inconsistency aborts the build with the matching
    /// [`OrmError`] variant; see the module documentation.
    pub fn build(&self) -> OrmResult<MetadataCollection> {
        let args_by_name: HashMap<String, EntityArgs> = self
            .registry
            .entities
            .iter()
            .map(|e| (e.name.clone(), e.clone()))
            .collect();

        // Pass 1: own columns (embedded flattening) and table names.
        let mut order: Vec<String> = Vec::new();
        let mut drafts: HashMap<String, EntityDraft> = HashMap::new();
        for args in &self.registry.entities {
            if args.embeddable {
                continue;
            }
            let table_name = self.table_name_of(&args_by_name, &args.name)?;
            let mut stack = vec![args.name.clone()];
            let columns =
                self.collect_columns(&args_by_name, &args.name, &[], "", &mut stack)?;
            order.push(args.name.clone());
            drafts.insert(
                args.name.clone(),
                EntityDraft {
                    args: args.clone(),
                    table_name,
                    columns,
                    relations: Vec::new(),
                },
            );
        }

        // Pass 2: relations.
        let mut junctions: Vec<EntityMetadata> = Vec::new();
        for rel in &self.registry.relations {
            self.build_relation(&args_by_name, &mut drafts, &mut junctions, rel)?;
        }

        // Pass 3: assembly.
        let mut entities: Vec<Arc<EntityMetadata>> = Vec::new();
        for name in &order {
            let built = self.assemble(&args_by_name, &drafts, name)?;
            entities.push(Arc::new(built));
        }
        for junction in junctions {
            entities.push(Arc::new(junction));
        }
        for closure in self.closure_tables(&entities)? {
            entities.push(Arc::new(closure));
        }
        self.attach_indices(&entities)?;
        self.check_invariants(&entities)?;

        Ok(MetadataCollection::new(self.connection.clone(), entities))
    }

    /// Resolves the table name, following single-table-inheritance parents
    /// up to the root.
    fn table_name_of(
        &self,
        args_by_name: &HashMap<String, EntityArgs>,
        entity: &str,
    ) -> OrmResult<String> {
        let root = self.root_of(args_by_name, entity)?;
        let root_args = &args_by_name[&root];
        Ok(self
            .naming
            .table_name(&root_args.name, root_args.table.as_deref()))
    }

    /// Follows the parent chain to the inheritance root.
    fn root_of(
        &self,
        args_by_name: &HashMap<String, EntityArgs>,
        entity: &str,
    ) -> OrmResult<String> {
        let mut current = entity.to_string();
        let mut seen = vec![current.clone()];
        while let Some(parent) = args_by_name
            .get(&current)
            .ok_or_else(|| OrmError::EntityNotFound {
                entity: current.clone(),
                connection: self.connection.clone(),
            })?
            .parent
            .clone()
        {
            if seen.contains(&parent) {
                return Err(OrmError::InvalidInheritance {
                    entity: entity.to_string(),
                    reason: "parent chain forms a cycle".to_string(),
                });
            }
            seen.push(parent.clone());
            current = parent;
        }
        Ok(current)
    }

    /// Collects an entity's own columns, recursing into embedded objects.
    ///
    /// `prefixes` are the accumulated database-name prefixes, outermost
    /// first; `path` is the accumulated property path ("" at the root).
    fn collect_columns(
        &self,
        args_by_name: &HashMap<String, EntityArgs>,
        entity: &str,
        prefixes: &[String],
        path: &str,
        stack: &mut Vec<String>,
    ) -> OrmResult<Vec<ColumnMetadata>> {
        let mut columns = Vec::new();

        for col in self.registry.columns.iter().filter(|c| c.target == entity) {
            columns.push(self.build_column(col, prefixes, path)?);
        }

        for emb in self
            .registry
            .embeddeds
            .iter()
            .filter(|e| e.target == entity)
        {
            if !args_by_name.contains_key(&emb.embedded) {
                return Err(OrmError::EntityNotFound {
                    entity: emb.embedded.clone(),
                    connection: self.connection.clone(),
                });
            }
            if stack.contains(&emb.embedded) {
                return Err(OrmError::CircularEmbedding {
                    entity: entity.to_string(),
                    property: emb.property.clone(),
                });
            }
            let prefix = match &emb.prefix {
                None => self.naming.embedded_prefix(&emb.property),
                Some(p) => p.clone(),
            };
            let mut nested_prefixes = prefixes.to_vec();
            if !prefix.is_empty() {
                nested_prefixes.push(prefix);
            }
            let nested_path = format!("{path}{}.", emb.property);
            stack.push(emb.embedded.clone());
            let nested = self.collect_columns(
                args_by_name,
                &emb.embedded,
                &nested_prefixes,
                &nested_path,
                stack,
            )?;
            stack.pop();
            columns.extend(nested);
        }

        Ok(columns)
    }

    /// Builds one column's metadata from its argument record.
    fn build_column(
        &self,
        args: &ColumnArgs,
        prefixes: &[String],
        path: &str,
    ) -> OrmResult<ColumnMetadata> {
        let column_type = args
            .column_type
            .or_else(|| args.kind.map(PropertyKind::inferred_column_type))
            .ok_or_else(|| OrmError::ColumnTypeUndefined {
                entity: args.target.clone(),
                property: args.property.clone(),
            })?;
        let database_name = self
            .naming
            .column_name(&args.property, args.name.as_deref(), prefixes);
        Ok(ColumnMetadata {
            property_name: format!("{path}{}", args.property),
            database_name,
            column_type,
            nullable: args.nullable,
            primary: args.primary,
            unique: args.unique,
            generated: args.generated,
            default: args.default.clone(),
            length: args.length,
            select: args.select,
            insert: args.insert,
            update: args.update,
            embedded_prefix: if prefixes.is_empty() {
                None
            } else {
                Some(prefixes.join(""))
            },
            transformer: args.transformer.clone(),
            references: None,
        })
    }

    /// Resolves one relation record: inverse pairing, ownership, and
    /// foreign-key / junction synthesis.
    fn build_relation(
        &self,
        args_by_name: &HashMap<String, EntityArgs>,
        drafts: &mut HashMap<String, EntityDraft>,
        junctions: &mut Vec<EntityMetadata>,
        rel: &RelationArgs,
    ) -> OrmResult<()> {
        if !drafts.contains_key(&rel.target) {
            return Err(OrmError::EntityNotFound {
                entity: rel.target.clone(),
                connection: self.connection.clone(),
            });
        }
        if !drafts.contains_key(&rel.related) {
            return Err(OrmError::EntityNotFound {
                entity: rel.related.clone(),
                connection: self.connection.clone(),
            });
        }

        // Inverse pairing: both sides must reference each other with
        // compatible kinds.
        let inverse_args = self.resolve_inverse(rel)?;

        let self_join_column = self
            .registry
            .join_columns
            .iter()
            .find(|j| j.target == rel.target && j.property == rel.property);
        let self_join_table = self
            .registry
            .join_tables
            .iter()
            .find(|j| j.target == rel.target && j.property == rel.property);
        let other_join_column = inverse_args.as_ref().and_then(|inv| {
            self.registry
                .join_columns
                .iter()
                .find(|j| j.target == inv.target && j.property == inv.property)
        });
        let other_join_table = inverse_args.as_ref().and_then(|inv| {
            self.registry
                .join_tables
                .iter()
                .find(|j| j.target == inv.target && j.property == inv.property)
        });

        let mut metadata = RelationMetadata {
            property_name: rel.property.clone(),
            kind: rel.kind,
            source: rel.target.clone(),
            target: rel.related.clone(),
            inverse_property: rel.inverse.clone(),
            owning: false,
            join_column: None,
            join_table: None,
            cascade: rel.cascade,
            eager: rel.eager,
            nullable: rel.nullable,
        };

        match rel.kind {
            RelationKind::ManyToOne => {
                if self_join_table.is_some() {
                    return Err(OrmError::InvalidJoinPlacement {
                        entity: rel.target.clone(),
                        property: rel.property.clone(),
                    });
                }
                metadata.owning = true;
                let spec = self.join_column_spec(
                    drafts,
                    rel,
                    self_join_column.map(|j| (j.name.clone(), j.referenced_property.clone())),
                )?;
                self.push_foreign_key(drafts, rel, &spec)?;
                metadata.join_column = Some(spec);
            }
            RelationKind::OneToOne => {
                if self_join_table.is_some() {
                    return Err(OrmError::InvalidJoinPlacement {
                        entity: rel.target.clone(),
                        property: rel.property.clone(),
                    });
                }
                match (self_join_column, other_join_column) {
                    (Some(_), Some(_)) => {
                        return Err(OrmError::AmbiguousOwnership {
                            entity: rel.target.clone(),
                            property: rel.property.clone(),
                        });
                    }
                    (Some(jc), None) => {
                        metadata.owning = true;
                        let spec = self.join_column_spec(
                            drafts,
                            rel,
                            Some((jc.name.clone(), jc.referenced_property.clone())),
                        )?;
                        self.push_foreign_key(drafts, rel, &spec)?;
                        metadata.join_column = Some(spec);
                    }
                    (None, Some(_)) => {
                        // Inverse side owns; nothing to synthesize here.
                    }
                    (None, None) => {
                        return Err(OrmError::MissingJoinSpecification {
                            entity: rel.target.clone(),
                            property: rel.property.clone(),
                        });
                    }
                }
            }
            RelationKind::OneToMany => {
                if self_join_column.is_some() || self_join_table.is_some() {
                    return Err(OrmError::InvalidJoinPlacement {
                        entity: rel.target.clone(),
                        property: rel.property.clone(),
                    });
                }
                if inverse_args.is_none() {
                    return Err(OrmError::OneToManyWithoutInverse {
                        entity: rel.target.clone(),
                        property: rel.property.clone(),
                    });
                }
            }
            RelationKind::ManyToMany => {
                if self_join_column.is_some() {
                    return Err(OrmError::InvalidJoinPlacement {
                        entity: rel.target.clone(),
                        property: rel.property.clone(),
                    });
                }
                match (self_join_table, other_join_table) {
                    (Some(_), Some(_)) => {
                        return Err(OrmError::AmbiguousOwnership {
                            entity: rel.target.clone(),
                            property: rel.property.clone(),
                        });
                    }
                    (Some(jt), None) => {
                        metadata.owning = true;
                        let spec = self.join_table_spec(
                            drafts,
                            rel,
                            jt.name.clone(),
                            jt.join_column.clone(),
                            jt.inverse_join_column.clone(),
                        )?;
                        junctions.push(self.junction_metadata(drafts, rel, &spec)?);
                        metadata.join_table = Some(spec);
                    }
                    (None, Some(_)) => {
                        // Inverse side owns the junction table.
                    }
                    (None, None) => {
                        return Err(OrmError::MissingJoinSpecification {
                            entity: rel.target.clone(),
                            property: rel.property.clone(),
                        });
                    }
                }
            }
        }

        drafts
            .get_mut(&rel.target)
            .expect("draft checked above")
            .relations
            .push(metadata);
        Ok(())
    }

    /// Finds and validates the inverse relation record, if one is named.
    fn resolve_inverse(&self, rel: &RelationArgs) -> OrmResult<Option<RelationArgs>> {
        let Some(inverse) = &rel.inverse else {
            return Ok(None);
        };
        let expected_kind = match rel.kind {
            RelationKind::OneToOne => RelationKind::OneToOne,
            RelationKind::ManyToOne => RelationKind::OneToMany,
            RelationKind::OneToMany => RelationKind::ManyToOne,
            RelationKind::ManyToMany => RelationKind::ManyToMany,
        };
        let found = self.registry.relations.iter().find(|other| {
            other.target == rel.related
                && other.property == *inverse
                && other.kind == expected_kind
                && other.inverse.as_deref() == Some(rel.property.as_str())
        });
        found.cloned().map(Some).ok_or_else(|| OrmError::MissingInverseSide {
            entity: rel.target.clone(),
            property: rel.property.clone(),
            target: rel.related.clone(),
            inverse: inverse.clone(),
        })
    }

    /// Computes the join-column spec of an owning to-one relation.
    fn join_column_spec(
        &self,
        drafts: &HashMap<String, EntityDraft>,
        rel: &RelationArgs,
        explicit: Option<(Option<String>, Option<String>)>,
    ) -> OrmResult<JoinColumnSpec> {
        let (explicit_name, explicit_referenced) = explicit.unwrap_or((None, None));
        let target_draft = &drafts[&rel.related];
        let referenced = match &explicit_referenced {
            Some(property) => target_draft
                .columns
                .iter()
                .find(|c| c.property_name == *property)
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: rel.related.clone(),
                    property: property.clone(),
                })?,
            None => target_draft
                .columns
                .iter()
                .find(|c| c.primary)
                .ok_or_else(|| OrmError::MissingPrimaryColumn {
                    entity: rel.related.clone(),
                })?,
        };
        let name = explicit_name.unwrap_or_else(|| {
            self.naming
                .join_column_name(&rel.property, &referenced.database_name)
        });
        Ok(JoinColumnSpec {
            name,
            referenced_property: referenced.property_name.clone(),
            referenced_column: referenced.database_name.clone(),
        })
    }

    /// Appends the foreign-key column synthesized from an owning to-one
    /// relation to the source entity's columns.
    fn push_foreign_key(
        &self,
        drafts: &mut HashMap<String, EntityDraft>,
        rel: &RelationArgs,
        spec: &JoinColumnSpec,
    ) -> OrmResult<()> {
        let referenced_type = {
            let target_draft = &drafts[&rel.related];
            target_draft
                .columns
                .iter()
                .find(|c| c.database_name == spec.referenced_column)
                .map(|c| c.column_type)
                .ok_or_else(|| OrmError::PropertyNotFound {
                    entity: rel.related.clone(),
                    property: spec.referenced_property.clone(),
                })?
        };
        let draft = drafts.get_mut(&rel.target).expect("draft checked above");
        draft.columns.push(ColumnMetadata {
            property_name: spec.name.clone(),
            database_name: spec.name.clone(),
            column_type: referenced_type,
            nullable: rel.nullable,
            primary: false,
            unique: rel.kind == RelationKind::OneToOne,
            generated: None,
            default: None,
            length: None,
            select: true,
            insert: true,
            update: true,
            embedded_prefix: None,
            transformer: None,
            references: Some((rel.related.clone(), spec.referenced_column.clone())),
        });
        Ok(())
    }

    /// Computes the join-table spec of an owning many-to-many relation.
    fn join_table_spec(
        &self,
        drafts: &HashMap<String, EntityDraft>,
        rel: &RelationArgs,
        explicit_name: Option<String>,
        explicit_join: Option<String>,
        explicit_inverse: Option<String>,
    ) -> OrmResult<JoinTableSpec> {
        let source = &drafts[&rel.target];
        let target = &drafts[&rel.related];
        let source_pk = source
            .columns
            .iter()
            .find(|c| c.primary)
            .ok_or_else(|| OrmError::MissingPrimaryColumn {
                entity: rel.target.clone(),
            })?;
        let target_pk = target
            .columns
            .iter()
            .find(|c| c.primary)
            .ok_or_else(|| OrmError::MissingPrimaryColumn {
                entity: rel.related.clone(),
            })?;
        let name = explicit_name.unwrap_or_else(|| {
            self.naming
                .join_table_name(&source.table_name, &target.table_name, &rel.property)
        });
        let join_column = explicit_join.unwrap_or_else(|| {
            self.naming
                .join_table_column_name(&source.table_name, &source_pk.database_name)
        });
        let inverse_join_column = explicit_inverse.unwrap_or_else(|| {
            self.naming
                .join_table_column_name(&target.table_name, &target_pk.database_name)
        });
        Ok(JoinTableSpec {
            name,
            join_column,
            inverse_join_column,
            source_referenced_column: source_pk.database_name.clone(),
            target_referenced_column: target_pk.database_name.clone(),
        })
    }

    /// Synthesizes the junction table's entity metadata.
    fn junction_metadata(
        &self,
        drafts: &HashMap<String, EntityDraft>,
        rel: &RelationArgs,
        spec: &JoinTableSpec,
    ) -> OrmResult<EntityMetadata> {
        let fk_column = |name: &str, entity: &str, referenced: &str| -> OrmResult<ColumnMetadata> {
            let referenced_type = drafts[entity]
                .columns
                .iter()
                .find(|c| c.database_name == referenced)
                .map(|c| c.column_type)
                .ok_or_else(|| OrmError::MissingPrimaryColumn {
                    entity: entity.to_string(),
                })?;
            Ok(ColumnMetadata {
                property_name: name.to_string(),
                database_name: name.to_string(),
                column_type: referenced_type,
                nullable: false,
                primary: true,
                unique: false,
                generated: None,
                default: None,
                length: None,
                select: true,
                insert: true,
                update: true,
                embedded_prefix: None,
                transformer: None,
                references: Some((entity.to_string(), referenced.to_string())),
            })
        };
        let columns = vec![
            Arc::new(fk_column(
                &spec.join_column,
                &rel.target,
                &spec.source_referenced_column,
            )?),
            Arc::new(fk_column(
                &spec.inverse_join_column,
                &rel.related,
                &spec.target_referenced_column,
            )?),
        ];
        Ok(EntityMetadata::new(
            spec.name.clone(),
            spec.name.clone(),
            columns,
            Vec::new(),
            Vec::new(),
            InheritancePattern::None,
            None,
            None,
            None,
            true,
        ))
    }

    /// Assembles the final metadata for one entity, applying single-table
    /// inheritance flattening and tree auxiliaries.
    fn assemble(
        &self,
        args_by_name: &HashMap<String, EntityArgs>,
        drafts: &HashMap<String, EntityDraft>,
        name: &str,
    ) -> OrmResult<EntityMetadata> {
        let draft = &drafts[name];
        let mut columns: Vec<ColumnMetadata>;
        let mut discriminator_column = None;
        let mut discriminator_value = None;

        if let Some(_parent) = &draft.args.parent {
            // Single-table-inheritance child: root columns + discriminator
            // + own columns, all in the root's table. Subtype-specific
            // columns must accept NULL since other subtypes never fill
            // them.
            let root_name = self.root_of(args_by_name, name)?;
            if args_by_name[&root_name].inheritance != InheritancePattern::SingleTable {
                return Err(OrmError::InvalidInheritance {
                    entity: name.to_string(),
                    reason: format!(
                        "root {root_name} does not declare single-table inheritance"
                    ),
                });
            }
            let root = &drafts[&root_name];
            columns = root.columns.clone();
            columns.push(self.discriminator(&root_name));
            columns.extend(draft.columns.iter().cloned().map(force_nullable));
            discriminator_column = Some(self.naming.discriminator_column());
            discriminator_value = Some(
                draft
                    .args
                    .discriminator_value
                    .clone()
                    .unwrap_or_else(|| name.to_string()),
            );
        } else {
            columns = draft.columns.clone();
            match draft.args.inheritance {
                InheritancePattern::SingleTable => {
                    columns.push(self.discriminator(name));
                    // Flatten every descendant's own columns into the root
                    // table, forced nullable.
                    for other in &self.registry.entities {
                        if other.embeddable || other.parent.is_none() || other.name == *name {
                            continue;
                        }
                        if self.root_of(args_by_name, &other.name)? == name {
                            columns.extend(
                                drafts[&other.name]
                                    .columns
                                    .iter()
                                    .cloned()
                                    .map(force_nullable),
                            );
                        }
                    }
                    discriminator_column = Some(self.naming.discriminator_column());
                    discriminator_value = Some(
                        draft
                            .args
                            .discriminator_value
                            .clone()
                            .unwrap_or_else(|| name.to_string()),
                    );
                }
                InheritancePattern::MaterializedPath => {
                    let mpath = self.naming.materialized_path_column();
                    columns.push(ColumnMetadata {
                        property_name: mpath.clone(),
                        database_name: mpath,
                        column_type: ColumnType::Varchar,
                        nullable: true,
                        primary: false,
                        unique: false,
                        generated: None,
                        default: None,
                        length: None,
                        select: true,
                        insert: true,
                        update: true,
                        embedded_prefix: None,
                        transformer: None,
                        references: None,
                    });
                }
                InheritancePattern::None | InheritancePattern::ClosureTable => {}
            }
        }

        Ok(EntityMetadata::new(
            name.to_string(),
            draft.table_name.clone(),
            columns.into_iter().map(Arc::new).collect(),
            draft.relations.iter().cloned().map(Arc::new).collect(),
            Vec::new(),
            draft.args.inheritance,
            discriminator_column,
            discriminator_value,
            draft.args.parent.clone(),
            false,
        ))
    }

    /// Builds the discriminator column for a single-table-inheritance
    /// hierarchy.
    fn discriminator(&self, _root: &str) -> ColumnMetadata {
        let name = self.naming.discriminator_column();
        ColumnMetadata {
            property_name: name.clone(),
            database_name: name,
            column_type: ColumnType::Varchar,
            nullable: false,
            primary: false,
            unique: false,
            generated: None,
            default: None,
            length: None,
            select: true,
            insert: true,
            update: false,
            embedded_prefix: None,
            transformer: None,
            references: None,
        }
    }

    /// Resolves index argument records against the final column lists.
    fn attach_indices(&self, entities: &[Arc<EntityMetadata>]) -> OrmResult<()> {
        for idx in &self.registry.indices {
            let entity = entities
                .iter()
                .find(|e| e.name == idx.target)
                .ok_or_else(|| OrmError::EntityNotFound {
                    entity: idx.target.clone(),
                    connection: self.connection.clone(),
                })?;
            let mut columns = Vec::with_capacity(idx.properties.len());
            for property in &idx.properties {
                let column =
                    entity
                        .column(property)
                        .ok_or_else(|| OrmError::PropertyNotFound {
                            entity: idx.target.clone(),
                            property: property.clone(),
                        })?;
                columns.push(column.database_name.clone());
            }
            let name = idx.name.clone().unwrap_or_else(|| {
                self.naming
                    .index_name(&entity.table_name, &columns, idx.unique)
            });
            entity.add_index(IndexMetadata {
                name,
                columns,
                unique: idx.unique,
            });
        }
        Ok(())
    }

    /// Final invariant checks: primary-key shape, increment uniqueness,
    /// table-name uniqueness, and closure-table synthesis.
    fn check_invariants(&self, entities: &[Arc<EntityMetadata>]) -> OrmResult<()> {
        let mut tables: HashMap<String, String> = HashMap::new();
        for entity in entities {
            if !entity.is_junction {
                if entity.primary_columns().is_empty() {
                    return Err(OrmError::MissingPrimaryColumn {
                        entity: entity.name.clone(),
                    });
                }
                let increments = entity
                    .columns
                    .iter()
                    .filter(|c| c.generated == Some(GeneratedKind::Increment))
                    .count();
                if increments > 1 {
                    return Err(OrmError::MultipleIncrementColumns {
                        entity: entity.name.clone(),
                    });
                }
            }
            if entity.parent.is_some() {
                // Children share the root's table by design.
                continue;
            }
            if let Some(existing) = tables.insert(entity.table_name.clone(), entity.name.clone())
            {
                return Err(OrmError::DuplicateTableName {
                    table: entity.table_name.clone(),
                    first: existing,
                    second: entity.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Synthesizes closure-table auxiliaries for tree entities. Called by
    /// [`build`](Self::build) after assembly via the returned list.
    fn closure_tables(
        &self,
        entities: &[Arc<EntityMetadata>],
    ) -> OrmResult<Vec<EntityMetadata>> {
        let mut out = Vec::new();
        for entity in entities {
            if entity.inheritance != InheritancePattern::ClosureTable {
                continue;
            }
            let pk = entity.primary_column()?;
            let table = self.naming.closure_table_name(&entity.table_name);
            let endpoint = |role: &str| -> ColumnMetadata {
                let name = self
                    .naming
                    .join_table_column_name(role, &pk.database_name);
                ColumnMetadata {
                    property_name: name.clone(),
                    database_name: name,
                    column_type: pk.column_type,
                    nullable: false,
                    primary: true,
                    unique: false,
                    generated: None,
                    default: None,
                    length: None,
                    select: true,
                    insert: true,
                    update: true,
                    embedded_prefix: None,
                    transformer: None,
                    references: Some((entity.name.clone(), pk.database_name.clone())),
                }
            };
            out.push(EntityMetadata::new(
                table.clone(),
                table,
                vec![Arc::new(endpoint("ancestor")), Arc::new(endpoint("descendant"))],
                Vec::new(),
                Vec::new(),
                InheritancePattern::None,
                None,
                None,
                None,
                true,
            ));
        }
        Ok(out)
    }
}

/// Returns a copy of `column` with NULL allowed.
fn force_nullable(mut column: ColumnMetadata) -> ColumnMetadata {
    column.nullable = true;
    column
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::args::{EmbeddedArgs, IndexArgs, JoinColumnArgs, JoinTableArgs};
    use crate::naming::DefaultNamingStrategy;
    use crate::test_support::{blog_metadata, blog_registry};

    fn build(registry: &MetadataRegistry) -> OrmResult<MetadataCollection> {
        MetadataBuilder::new(registry, &DefaultNamingStrategy, "test").build()
    }

    #[test]
    fn blog_fixture_builds() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        assert_eq!(post.table_name, "post");
        // Foreign key synthesized from the owning many-to-one.
        let fk = post.column("author_id").expect("fk column");
        assert!(fk.is_foreign_key());
        assert_eq!(fk.references, Some(("User".to_string(), "id".to_string())));
        // Junction table synthesized from the owning many-to-many.
        let junction = meta.get("post_categories_category").unwrap();
        assert!(junction.is_junction);
        let names: Vec<_> = junction
            .columns
            .iter()
            .map(|c| c.database_name.clone())
            .collect();
        assert_eq!(names, vec!["post_id", "category_id"]);
        assert!(junction.columns.iter().all(|c| c.primary));
    }

    #[test]
    fn inverse_sides_share_one_owner() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let category = meta.get("Category").unwrap();
        let owning = post.relation("categories").unwrap();
        let inverse = category.relation("posts").unwrap();
        assert!(owning.owning);
        assert!(!inverse.owning);
        assert!(owning.join_table.is_some());
        assert!(inverse.join_table.is_none());
        let resolved = meta.owning_relation(&inverse).unwrap();
        assert_eq!(resolved.property_name, "categories");
    }

    fn embedded_registry(prefix: Option<&str>) -> MetadataRegistry {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Address").embeddable())
            .add_column(ColumnArgs::new("Address", "city").kind(PropertyKind::String))
            .add_column(ColumnArgs::new("Address", "zipCode").kind(PropertyKind::String));
        reg.add_entity(EntityArgs::new("User"))
            .add_column(
                ColumnArgs::new("User", "id")
                    .kind(PropertyKind::Int)
                    .primary(),
            );
        let mut emb = EmbeddedArgs::new("User", "address", "Address");
        if let Some(p) = prefix {
            emb = emb.prefix(p);
        }
        reg.add_embedded(emb);
        reg
    }

    #[test]
    fn embedded_prefix_unset_uses_naming_strategy() {
        let meta = build(&embedded_registry(None)).unwrap();
        let user = meta.get("User").unwrap();
        let city = user.column("address.city").unwrap();
        assert_eq!(city.database_name, "address_city");
        assert_eq!(
            user.column("address.zipCode").unwrap().database_name,
            "address_zip_code"
        );
    }

    #[test]
    fn embedded_prefix_empty_applies_none() {
        let meta = build(&embedded_registry(Some(""))).unwrap();
        let user = meta.get("User").unwrap();
        assert_eq!(user.column("address.city").unwrap().database_name, "city");
    }

    #[test]
    fn embedded_prefix_explicit_is_literal() {
        let meta = build(&embedded_registry(Some("addr_"))).unwrap();
        let user = meta.get("User").unwrap();
        assert_eq!(
            user.column("address.city").unwrap().database_name,
            "addr_city"
        );
    }

    #[test]
    fn embeddable_entities_produce_no_table() {
        let meta = build(&embedded_registry(None)).unwrap();
        assert!(meta.get("Address").is_err());
    }

    #[test]
    fn unresolvable_column_type_fails() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Thing"))
            .add_column(ColumnArgs::new("Thing", "id").kind(PropertyKind::Int).primary())
            .add_column(ColumnArgs::new("Thing", "payload"));
        let err = build(&reg).unwrap_err();
        assert!(matches!(
            err,
            OrmError::ColumnTypeUndefined { ref entity, ref property }
                if entity == "Thing" && property == "payload"
        ));
    }

    #[test]
    fn many_to_many_without_join_table_fails() {
        let mut reg = blog_registry();
        reg.join_tables.clear();
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::MissingJoinSpecification { .. }));
    }

    #[test]
    fn many_to_many_with_two_join_tables_fails() {
        let mut reg = blog_registry();
        reg.add_join_table(JoinTableArgs::new("Category", "posts"));
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::AmbiguousOwnership { .. }));
    }

    #[test]
    fn one_to_many_with_join_column_fails() {
        let mut reg = blog_registry();
        reg.add_join_column(JoinColumnArgs::new("User", "posts"));
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::InvalidJoinPlacement { .. }));
    }

    #[test]
    fn one_to_many_without_inverse_fails() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("A"))
            .add_column(ColumnArgs::new("A", "id").kind(PropertyKind::Int).primary())
            .add_relation(RelationArgs::new("A", "items", RelationKind::OneToMany, "B"));
        reg.add_entity(EntityArgs::new("B"))
            .add_column(ColumnArgs::new("B", "id").kind(PropertyKind::Int).primary());
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::OneToManyWithoutInverse { .. }));
    }

    #[test]
    fn missing_inverse_property_fails() {
        let mut reg = blog_registry();
        // Break the pairing: Post.author now names an inverse that does
        // not exist on User.
        for rel in &mut reg.relations {
            if rel.target == "Post" && rel.property == "author" {
                rel.inverse = Some("articles".to_string());
            }
        }
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::MissingInverseSide { .. }));
    }

    #[test]
    fn one_to_one_requires_exactly_one_join_column() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("User"))
            .add_column(ColumnArgs::new("User", "id").kind(PropertyKind::Int).primary())
            .add_relation(
                RelationArgs::new("User", "profile", RelationKind::OneToOne, "Profile")
                    .inverse("user"),
            );
        reg.add_entity(EntityArgs::new("Profile"))
            .add_column(
                ColumnArgs::new("Profile", "id")
                    .kind(PropertyKind::Int)
                    .primary(),
            )
            .add_relation(
                RelationArgs::new("Profile", "user", RelationKind::OneToOne, "User")
                    .inverse("profile"),
            );

        // Neither side declares the join column.
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::MissingJoinSpecification { .. }));

        // One side declares it: builds, with ownership on that side.
        let mut ok = reg.clone();
        ok.add_join_column(JoinColumnArgs::new("Profile", "user"));
        let meta = build(&ok).unwrap();
        let profile = meta.get("Profile").unwrap();
        assert!(profile.relation("user").unwrap().owning);
        assert!(!meta.get("User").unwrap().relation("profile").unwrap().owning);
        assert!(profile.column("user_id").unwrap().unique);

        // Both sides declare it: ambiguous.
        let mut both = reg;
        both.add_join_column(JoinColumnArgs::new("Profile", "user"));
        both.add_join_column(JoinColumnArgs::new("User", "profile"));
        let err = build(&both).unwrap_err();
        assert!(matches!(err, OrmError::AmbiguousOwnership { .. }));
    }

    #[test]
    fn duplicate_table_names_fail() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Post"))
            .add_column(ColumnArgs::new("Post", "id").kind(PropertyKind::Int).primary());
        reg.add_entity(EntityArgs::new("Article").table("post"))
            .add_column(
                ColumnArgs::new("Article", "id")
                    .kind(PropertyKind::Int)
                    .primary(),
            );
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::DuplicateTableName { .. }));
    }

    #[test]
    fn missing_primary_column_fails() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Note"))
            .add_column(ColumnArgs::new("Note", "body").kind(PropertyKind::String));
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::MissingPrimaryColumn { .. }));
    }

    #[test]
    fn two_increment_columns_fail() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Seq"))
            .add_column(
                ColumnArgs::new("Seq", "a")
                    .kind(PropertyKind::Int)
                    .primary()
                    .generated(GeneratedKind::Increment),
            )
            .add_column(
                ColumnArgs::new("Seq", "b")
                    .kind(PropertyKind::Int)
                    .generated(GeneratedKind::Increment),
            );
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::MultipleIncrementColumns { .. }));
    }

    #[test]
    fn single_table_inheritance_flattens_into_root() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(
            EntityArgs::new("Content").inheritance(InheritancePattern::SingleTable),
        )
        .add_column(
            ColumnArgs::new("Content", "id")
                .kind(PropertyKind::Int)
                .primary()
                .generated(GeneratedKind::Increment),
        )
        .add_column(ColumnArgs::new("Content", "title").kind(PropertyKind::String));
        reg.add_entity(EntityArgs::new("Video").child_of("Content"))
            .add_column(ColumnArgs::new("Video", "duration").kind(PropertyKind::Int));

        let meta = build(&reg).unwrap();
        let root = meta.get("Content").unwrap();
        let child = meta.get("Video").unwrap();

        assert_eq!(root.table_name, "content");
        assert_eq!(child.table_name, "content");
        assert_eq!(root.discriminator_column.as_deref(), Some("kind"));
        assert_eq!(child.discriminator_value.as_deref(), Some("Video"));
        // The subtype column lands in the root table, forced nullable.
        let duration = root.column("duration").unwrap();
        assert!(duration.nullable);
        // The child's view carries the root's columns.
        assert!(child.column("title").is_some());
        assert!(child.column("id").unwrap().primary);
    }

    #[test]
    fn child_of_non_inheriting_root_fails() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(EntityArgs::new("Base"))
            .add_column(ColumnArgs::new("Base", "id").kind(PropertyKind::Int).primary());
        reg.add_entity(EntityArgs::new("Derived").child_of("Base"))
            .add_column(ColumnArgs::new("Derived", "x").kind(PropertyKind::Int));
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::InvalidInheritance { .. }));
    }

    #[test]
    fn closure_table_is_synthesized() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(
            EntityArgs::new("Category").inheritance(InheritancePattern::ClosureTable),
        )
        .add_column(
            ColumnArgs::new("Category", "id")
                .kind(PropertyKind::Int)
                .primary(),
        );
        let meta = build(&reg).unwrap();
        let closure = meta.get("category_closure").unwrap();
        assert!(closure.is_junction);
        let names: Vec<_> = closure
            .columns
            .iter()
            .map(|c| c.database_name.clone())
            .collect();
        assert_eq!(names, vec!["ancestor_id", "descendant_id"]);
    }

    #[test]
    fn materialized_path_adds_column() {
        let mut reg = MetadataRegistry::new();
        reg.add_entity(
            EntityArgs::new("Node").inheritance(InheritancePattern::MaterializedPath),
        )
        .add_column(ColumnArgs::new("Node", "id").kind(PropertyKind::Int).primary());
        let meta = build(&reg).unwrap();
        let node = meta.get("Node").unwrap();
        let mpath = node.column("mpath").unwrap();
        assert_eq!(mpath.column_type, ColumnType::Varchar);
        assert!(mpath.nullable);
    }

    #[test]
    fn indices_resolve_to_database_names() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        let indices = post.indices();
        assert_eq!(indices.len(), 1);
        assert_eq!(indices[0].name, "idx_post_title");
        assert_eq!(indices[0].columns, vec!["title"]);
        assert!(!indices[0].unique);
    }

    #[test]
    fn index_over_unknown_property_fails() {
        let mut reg = blog_registry();
        reg.add_index(IndexArgs::new("Post", vec!["missing"]));
        let err = build(&reg).unwrap_err();
        assert!(matches!(err, OrmError::PropertyNotFound { .. }));
    }

    #[test]
    fn index_metadata_stays_mutable_after_build() {
        let meta = blog_metadata();
        let post = meta.get("Post").unwrap();
        post.set_indices(vec![IndexMetadata {
            name: "idx_post_views".to_string(),
            columns: vec!["views".to_string()],
            unique: false,
        }]);
        assert_eq!(post.indices()[0].name, "idx_post_views");
    }
}
