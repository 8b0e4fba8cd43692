//! Session factory and the shared, read-only mapping state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use strata_core::{Connection, Error, Result};
use strata_inheritance::{PersistenceStrategy, SchemaStatements, strategy_for};
use strata_schema::{Registry, ddl};

use crate::SessionConfig;
use crate::session::Session;

/// Whether the factory creates the schema when the first session opens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    #[default]
    None,
    Create,
}

/// The registry plus the strategy chosen for each hierarchy.
///
/// Built once and shared by every session of a factory; never mutated.
#[derive(Debug)]
pub struct Metamodel {
    registry: Registry,
    /// Keyed by root entity name.
    strategies: HashMap<String, Arc<dyn PersistenceStrategy>>,
}

impl Metamodel {
    pub fn new(registry: Registry) -> Self {
        let strategies: HashMap<String, Arc<dyn PersistenceStrategy>> = registry
            .roots()
            .map(|root| (root.name.clone(), strategy_for(root.strategy())))
            .collect();
        for (root, strategy) in &strategies {
            tracing::debug!(root = %root, strategy = ?strategy.kind(), "Selected persistence strategy");
        }
        Self {
            registry,
            strategies,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Strategy of the hierarchy `entity` belongs to.
    pub fn strategy(&self, entity: &str) -> Result<Arc<dyn PersistenceStrategy>> {
        let root = self.registry.root_of(entity)?;
        self.strategies
            .get(&root.name)
            .cloned()
            .ok_or_else(|| Error::mapping(entity, "no persistence strategy for hierarchy"))
    }

    /// DDL for every hierarchy and link table, each statement once.
    pub fn schema_statements(&self) -> Result<SchemaStatements> {
        let mut all = SchemaStatements::default();
        for root in self.registry.roots() {
            all.extend(self.strategy(&root.name)?.create(&self.registry, &root.name)?);
        }
        for link in self.registry.link_tables() {
            let (tables, constraints) = ddl::generate(&ddl::link_table(link));
            all.tables.extend(tables);
            all.constraints.extend(constraints);
        }
        let mut seen = HashSet::new();
        all.tables.retain(|s| seen.insert(s.clone()));
        all.constraints.retain(|s| seen.insert(s.clone()));
        Ok(all)
    }
}

/// Opens sessions over a shared [`Metamodel`].
///
/// The factory is `Send + Sync`; sessions are not.
#[derive(Debug)]
pub struct SessionFactory {
    metamodel: Arc<Metamodel>,
    config: SessionConfig,
    schema: SchemaMode,
    schema_created: AtomicBool,
}

impl SessionFactory {
    pub fn new(registry: Registry, config: SessionConfig, schema: SchemaMode) -> Self {
        tracing::info!(
            entities = registry.len(),
            roots = registry.roots().count(),
            schema = ?schema,
            "Building session factory"
        );
        Self {
            metamodel: Arc::new(Metamodel::new(registry)),
            config,
            schema,
            schema_created: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> &Registry {
        self.metamodel.registry()
    }

    pub fn metamodel(&self) -> Arc<Metamodel> {
        Arc::clone(&self.metamodel)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn schema_mode(&self) -> SchemaMode {
        self.schema
    }

    pub fn schema_statements(&self) -> Result<SchemaStatements> {
        self.metamodel.schema_statements()
    }

    /// Run every table statement, then every constraint statement.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn create_schema(&self, conn: &mut dyn Connection) -> Result<()> {
        let statements = self.schema_statements()?;
        for sql in statements.tables.iter().chain(&statements.constraints) {
            tracing::debug!(sql = %sql, params = 0, "Executing DDL");
            conn.execute(sql, &[])?;
        }
        tracing::info!(
            tables = statements.tables.len(),
            constraints = statements.constraints.len(),
            "Schema created"
        );
        Ok(())
    }

    /// Open a session that owns `conn`.
    ///
    /// With [`SchemaMode::Create`], the first session opened by this factory
    /// creates the schema on its connection.
    #[tracing::instrument(level = "debug", skip(self, conn))]
    pub fn open_session<C: Connection + 'static>(&self, mut conn: C) -> Result<Session<C>> {
        if self.schema == SchemaMode::Create && !self.schema_created.swap(true, Ordering::SeqCst) {
            if let Err(e) = self.create_schema(&mut conn) {
                self.schema_created.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        Ok(Session::with_config(conn, self.metamodel(), self.config.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Recorder, registry};

    #[test]
    fn test_schema_statements_cover_tables_and_links() {
        let factory = SessionFactory::new(registry(), SessionConfig::default(), SchemaMode::None);
        let ddl = factory.schema_statements().unwrap();
        let tables: Vec<&str> = ddl
            .tables
            .iter()
            .filter_map(|s| s.split('"').nth(1))
            .collect();
        assert_eq!(tables, vec!["hero", "power", "team", "hero_power"]);
        assert!(ddl.tables[0].contains("FOREIGN KEY (\"team_id\") REFERENCES \"team\"(\"id\")"));
        assert!(ddl.tables[0].contains("FOREIGN KEY (\"mentor_id\") REFERENCES \"hero\"(\"id\")"));
    }

    #[test]
    fn test_schema_is_created_once() {
        let factory = SessionFactory::new(registry(), SessionConfig::default(), SchemaMode::Create);
        let first = factory.open_session(Recorder::default()).unwrap();
        assert_eq!(first.connection().statements.len(), 4);
        let second = factory.open_session(Recorder::default()).unwrap();
        assert!(second.connection().statements.is_empty());
    }

    #[test]
    fn test_strategy_cached_per_root() {
        let factory = SessionFactory::new(registry(), SessionConfig::default(), SchemaMode::None);
        let meta = factory.metamodel();
        let a = meta.strategy("Hero").unwrap();
        let b = meta.strategy("Hero").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(meta.strategy("Nope").is_err());
    }

    #[test]
    fn test_schema_mode_from_json() {
        let mode: SchemaMode = serde_json::from_str("\"create\"").unwrap();
        assert_eq!(mode, SchemaMode::Create);
        assert_eq!(SchemaMode::default(), SchemaMode::None);
    }
}
