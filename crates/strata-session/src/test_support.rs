//! Fixtures for session tests: a small association model and a recording
//! connection.

use std::collections::VecDeque;
use std::sync::Arc;

use strata_core::{
    Connection, Entity, EntityDescriptor, Error, FieldInfo, FromValue, LazyCollection, Model,
    Reference, RelationshipInfo, Result, Row, SqlType, Value,
};
use strata_schema::Registry;

fn id() -> FieldInfo {
    FieldInfo::new("id", "id", SqlType::BigInt)
        .primary_key(true)
        .auto_increment(true)
        .nullable(true)
}

#[derive(Debug, Clone, Default)]
pub struct Team {
    pub id: Option<i64>,
    pub name: String,
    pub heroes: LazyCollection,
}

impl Entity for Team {
    fn entity_name(&self) -> &'static str {
        "Team"
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Error::unknown_field("Team", field)),
        }
        Ok(())
    }

    fn collection(&self, field: &str) -> Option<&LazyCollection> {
        (field == "heroes").then_some(&self.heroes)
    }

    fn collection_mut(&mut self, field: &str) -> Option<&mut LazyCollection> {
        (field == "heroes").then_some(&mut self.heroes)
    }

    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }
}

impl Model for Team {
    const ENTITY_NAME: &'static str = "Team";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .field(id())
            .field(FieldInfo::new("name", "name", SqlType::Text))
            .relationship(RelationshipInfo::one_to_many("heroes", "Hero").back_populates("team"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hero {
    pub id: Option<i64>,
    pub name: String,
    pub team: Reference,
    pub mentor: Reference,
    pub powers: LazyCollection,
}

impl Entity for Hero {
    fn entity_name(&self) -> &'static str {
        "Hero"
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Error::unknown_field("Hero", field)),
        }
        Ok(())
    }

    fn reference(&self, field: &str) -> Option<&Reference> {
        match field {
            "team" => Some(&self.team),
            "mentor" => Some(&self.mentor),
            _ => None,
        }
    }

    fn reference_mut(&mut self, field: &str) -> Option<&mut Reference> {
        match field {
            "team" => Some(&mut self.team),
            "mentor" => Some(&mut self.mentor),
            _ => None,
        }
    }

    fn collection(&self, field: &str) -> Option<&LazyCollection> {
        (field == "powers").then_some(&self.powers)
    }

    fn collection_mut(&mut self, field: &str) -> Option<&mut LazyCollection> {
        (field == "powers").then_some(&mut self.powers)
    }

    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }
}

impl Model for Hero {
    const ENTITY_NAME: &'static str = "Hero";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .field(id())
            .field(FieldInfo::new("name", "name", SqlType::Text))
            .relationship(RelationshipInfo::many_to_one("team", "Team").back_populates("heroes"))
            .relationship(RelationshipInfo::many_to_one("mentor", "Hero"))
            .relationship(RelationshipInfo::many_to_many("powers", "Power"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Power {
    pub id: Option<i64>,
    pub name: String,
}

impl Entity for Power {
    fn entity_name(&self) -> &'static str {
        "Power"
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(self.id.into()),
            "name" => Some(self.name.clone().into()),
            _ => None,
        }
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match field {
            "id" => self.id = FromValue::from_value(value)?,
            "name" => self.name = FromValue::from_value(value)?,
            _ => return Err(Error::unknown_field("Power", field)),
        }
        Ok(())
    }

    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }
}

impl Model for Power {
    const ENTITY_NAME: &'static str = "Power";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .field(id())
            .field(FieldInfo::new("name", "name", SqlType::Text))
    }
}

pub fn descriptors() -> Vec<EntityDescriptor> {
    vec![Team::descriptor(), Hero::descriptor(), Power::descriptor()]
}

pub fn registry() -> Registry {
    Registry::build(descriptors()).unwrap()
}

/// Connection that records statements and replays canned results.
#[derive(Debug, Default)]
pub struct Recorder {
    pub statements: Vec<(String, Vec<Value>)>,
    pub results: VecDeque<Vec<Row>>,
    /// Transaction control calls, in order.
    pub tx: Vec<&'static str>,
    pub next_key: i64,
    /// Fail the insert whose SQL contains this text.
    pub fail_on: Option<String>,
}

impl Recorder {
    pub fn sql(&self) -> Vec<&str> {
        self.statements.iter().map(|(s, _)| s.as_str()).collect()
    }

    pub fn push_rows(&mut self, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns = Arc::new(columns.iter().map(|c| (*c).to_string()).collect::<Vec<_>>());
        self.results.push_back(
            rows.into_iter()
                .map(|values| Row::new(Arc::clone(&columns), values))
                .collect(),
        );
    }
}

impl Connection for Recorder {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.statements.push((sql.to_string(), params.to_vec()));
        Ok(self.results.pop_front().unwrap_or_default())
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.statements.push((sql.to_string(), params.to_vec()));
        Ok(1)
    }

    fn insert(&mut self, sql: &str, id_column: Option<&str>, params: &[Value]) -> Result<Option<i64>> {
        self.statements.push((sql.to_string(), params.to_vec()));
        if self.fail_on.as_deref().is_some_and(|f| sql.contains(f)) {
            return Err(Error::Custom("injected failure".into()));
        }
        Ok(id_column.map(|_| {
            self.next_key += 1;
            self.next_key
        }))
    }

    fn set_auto_commit(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.tx.push("begin");
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.tx.push("commit");
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.tx.push("rollback");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.tx.push("close");
        Ok(())
    }
}
