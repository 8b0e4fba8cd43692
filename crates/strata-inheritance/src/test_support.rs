//! Fixtures for strategy tests: a field-map entity and a recording connection.

use std::collections::VecDeque;
use std::sync::Arc;

use strata_core::{
    Connection, Entity, EntityDescriptor, Error, FieldInfo, InheritanceInfo, Reference, Result,
    Row, SqlType, Value,
};
use strata_schema::Registry;

/// Entity whose fields live in a list of name/value pairs.
#[derive(Debug, Clone)]
pub struct Record {
    pub name: &'static str,
    pub fields: Vec<(&'static str, Value)>,
    pub refs: Vec<(&'static str, Reference)>,
}

impl Record {
    pub fn new(name: &'static str, fields: &[&'static str]) -> Self {
        Self {
            name,
            fields: fields.iter().map(|f| (*f, Value::Null)).collect(),
            refs: Vec::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        if let Some(slot) = self.fields.iter_mut().find(|(n, _)| *n == field) {
            slot.1 = value.into();
        }
        self
    }
}

impl Entity for Record {
    fn entity_name(&self) -> &'static str {
        self.name
    }

    fn get_value(&self, field: &str) -> Option<Value> {
        self.fields
            .iter()
            .find(|(n, _)| *n == field)
            .map(|(_, v)| v.clone())
    }

    fn set_value(&mut self, field: &str, value: Value) -> Result<()> {
        match self.fields.iter_mut().find(|(n, _)| *n == field) {
            Some(slot) => {
                slot.1 = value;
                Ok(())
            }
            None => Err(Error::unknown_field(self.name, field)),
        }
    }

    fn reference(&self, field: &str) -> Option<&Reference> {
        self.refs.iter().find(|(n, _)| *n == field).map(|(_, r)| r)
    }

    fn reference_mut(&mut self, field: &str) -> Option<&mut Reference> {
        self.refs
            .iter_mut()
            .find(|(n, _)| *n == field)
            .map(|(_, r)| r)
    }

    fn clone_entity(&self) -> Box<dyn Entity> {
        Box::new(self.clone())
    }
}

/// Connection that records statements and replays canned results.
#[derive(Debug, Default)]
pub struct Recorder {
    pub statements: Vec<(String, Vec<Value>)>,
    pub results: VecDeque<Vec<Row>>,
    /// Affected-row counts for `execute`; 1 once exhausted.
    pub affected: VecDeque<u64>,
    pub next_key: i64,
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
        Ok(self.affected.pop_front().unwrap_or(1))
    }

    fn insert(&mut self, sql: &str, id_column: Option<&str>, params: &[Value]) -> Result<Option<i64>> {
        self.statements.push((sql.to_string(), params.to_vec()));
        self.next_key += 1;
        Ok(id_column.map(|_| self.next_key))
    }

    fn set_auto_commit(&mut self, _enabled: bool) -> Result<()> {
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn id() -> FieldInfo {
    FieldInfo::new("id", "id", SqlType::BigInt)
        .primary_key(true)
        .auto_increment(true)
        .nullable(true)
}

fn text(name: &'static str) -> FieldInfo {
    FieldInfo::new(name, name, SqlType::Text)
}

// Table per concrete class: Shape (abstract) -> Circle, Square.
fn shape() -> EntityDescriptor {
    EntityDescriptor::new("Shape")
        .abstract_entity()
        .inheritance(InheritanceInfo::concrete_table())
        .field(id())
        .field(text("label"))
}
fn circle() -> EntityDescriptor {
    EntityDescriptor::new("Circle")
        .extends(shape)
        .factory(|| Box::new(Record::new("Circle", &["id", "label", "radius"])))
        .field(FieldInfo::new("radius", "radius", SqlType::Double))
}
fn square() -> EntityDescriptor {
    EntityDescriptor::new("Square")
        .extends(shape)
        .factory(|| Box::new(Record::new("Square", &["id", "label", "side"])))
        .field(FieldInfo::new("side", "side", SqlType::Double))
}

// Single table: Employee -> Manager, Engineer.
fn employee() -> EntityDescriptor {
    EntityDescriptor::new("Employee")
        .inheritance(InheritanceInfo::single_table().with_discriminator_column("kind"))
        .factory(|| Box::new(Record::new("Employee", &["id", "name"])))
        .field(id())
        .field(text("name"))
}
fn manager() -> EntityDescriptor {
    EntityDescriptor::new("Manager")
        .extends(employee)
        .discriminator_value("MGR")
        .factory(|| Box::new(Record::new("Manager", &["id", "name", "budget"])))
        .field(FieldInfo::new("budget", "budget", SqlType::Double))
}
fn engineer() -> EntityDescriptor {
    EntityDescriptor::new("Engineer")
        .extends(employee)
        .factory(|| Box::new(Record::new("Engineer", &["id", "name", "language"])))
        .field(text("language"))
}

// Joined: Person -> Student -> Graduate.
fn person() -> EntityDescriptor {
    EntityDescriptor::new("Person")
        .inheritance(InheritanceInfo::joined_table())
        .factory(|| Box::new(Record::new("Person", &["id", "name"])))
        .field(id())
        .field(text("name"))
}
fn student() -> EntityDescriptor {
    EntityDescriptor::new("Student")
        .extends(person)
        .factory(|| Box::new(Record::new("Student", &["id", "name", "school"])))
        .field(text("school"))
}
fn graduate() -> EntityDescriptor {
    EntityDescriptor::new("Graduate")
        .extends(student)
        .factory(|| Box::new(Record::new("Graduate", &["id", "name", "school", "thesis"])))
        .field(text("thesis"))
}

// Joined with an abstract root: Vehicle (abstract) -> Car, Truck.
fn vehicle() -> EntityDescriptor {
    EntityDescriptor::new("Vehicle")
        .abstract_entity()
        .inheritance(InheritanceInfo::joined_table())
        .field(id())
        .field(text("make"))
}
fn car() -> EntityDescriptor {
    EntityDescriptor::new("Car")
        .extends(vehicle)
        .factory(|| Box::new(Record::new("Car", &["id", "make", "doors"])))
        .field(FieldInfo::new("doors", "doors", SqlType::Integer))
}
fn truck() -> EntityDescriptor {
    EntityDescriptor::new("Truck")
        .extends(vehicle)
        .factory(|| Box::new(Record::new("Truck", &["id", "make", "payload"])))
        .field(FieldInfo::new("payload", "payload", SqlType::Double))
}

// Concrete tables with FK: Product (abstract) -> Book -> SignedBook.
fn product() -> EntityDescriptor {
    EntityDescriptor::new("Product")
        .abstract_entity()
        .inheritance(InheritanceInfo::concrete_foreign_key())
        .field(id())
        .field(text("title"))
}
fn book() -> EntityDescriptor {
    EntityDescriptor::new("Book")
        .extends(product)
        .factory(|| Box::new(Record::new("Book", &["id", "title", "pages"])))
        .field(FieldInfo::new("pages", "pages", SqlType::Integer))
}
fn signed_book() -> EntityDescriptor {
    EntityDescriptor::new("SignedBook")
        .extends(book)
        .factory(|| Box::new(Record::new("SignedBook", &["id", "title", "pages", "signer"])))
        .field(text("signer"))
}

pub fn registry() -> Registry {
    Registry::build(vec![
        circle(),
        square(),
        manager(),
        engineer(),
        graduate(),
        car(),
        truck(),
        signed_book(),
    ])
    .unwrap()
}

pub fn record(registry: &Registry, name: &str) -> Box<dyn Entity> {
    let factory = registry.entity(name).unwrap().factory.unwrap();
    factory()
}
