//! Shared models for the SQLite integration tests.
//!
//! One hierarchy per inheritance strategy, plus a small association model.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use strata::prelude::*;
use tempfile::TempDir;

/// Declare a mapped struct and its accessor table.
///
/// Roots get an `id: Option<i64>`; subclasses embed their parent and
/// delegate every name they do not declare.
macro_rules! entity {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub id: Option<i64>,
            $(pub $field: $ty,)*
        }

        impl ::strata::Entity for $name {
            fn entity_name(&self) -> &'static str {
                stringify!($name)
            }

            fn get_value(&self, field: &str) -> Option<::strata::Value> {
                match field {
                    "id" => Some(self.id.into()),
                    $(stringify!($field) => Some(self.$field.clone().into()),)*
                    _ => None,
                }
            }

            fn set_value(&mut self, field: &str, value: ::strata::Value) -> ::strata::Result<()> {
                match field {
                    "id" => self.id = ::strata::FromValue::from_value(value)?,
                    $(stringify!($field) => self.$field = ::strata::FromValue::from_value(value)?,)*
                    _ => return Err(::strata::Error::unknown_field(stringify!($name), field)),
                }
                Ok(())
            }

            fn clone_entity(&self) -> Box<dyn ::strata::Entity> {
                Box::new(self.clone())
            }
        }
    };
    ($name:ident extends $parent:ident as $base:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            pub $base: $parent,
            $(pub $field: $ty,)*
        }

        impl ::strata::Entity for $name {
            fn entity_name(&self) -> &'static str {
                stringify!($name)
            }

            fn get_value(&self, field: &str) -> Option<::strata::Value> {
                match field {
                    $(stringify!($field) => Some(self.$field.clone().into()),)*
                    _ => self.$base.get_value(field),
                }
            }

            fn set_value(&mut self, field: &str, value: ::strata::Value) -> ::strata::Result<()> {
                match field {
                    $(stringify!($field) => {
                        self.$field = ::strata::FromValue::from_value(value)?;
                        Ok(())
                    })*
                    _ => self.$base.set_value(field, value),
                }
            }

            fn clone_entity(&self) -> Box<dyn ::strata::Entity> {
                Box::new(self.clone())
            }
        }
    };
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

fn real(name: &'static str) -> FieldInfo {
    FieldInfo::new(name, name, SqlType::Double)
}

fn int(name: &'static str) -> FieldInfo {
    FieldInfo::new(name, name, SqlType::BigInt)
}

// ============================================================================
// Single table: Employee -> Manager -> Director, Employee -> Engineer
// ============================================================================

entity!(Employee { name: String });
entity!(Manager extends Employee as employee { budget: f64 });
entity!(Director extends Manager as manager { region: String });
entity!(Engineer extends Employee as employee { language: String });

impl Model for Employee {
    const ENTITY_NAME: &'static str = "Employee";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .inheritance(InheritanceInfo::single_table().with_discriminator_column("kind"))
            .field(id())
            .field(text("name"))
    }
}

impl Model for Manager {
    const ENTITY_NAME: &'static str = "Manager";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Employee::descriptor)
            .discriminator_value("MGR")
            .field(real("budget"))
    }
}

impl Model for Director {
    const ENTITY_NAME: &'static str = "Director";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Manager::descriptor)
            .discriminator_value("DIR")
            .field(text("region"))
    }
}

impl Model for Engineer {
    const ENTITY_NAME: &'static str = "Engineer";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Employee::descriptor)
            .field(text("language"))
    }
}

// ============================================================================
// Joined: Person -> Student -> GraduateStudent, Person -> Teacher
// ============================================================================

entity!(Person { name: String });
entity!(Student extends Person as person { school: String });
entity!(GraduateStudent extends Student as student { thesis: String });
entity!(Teacher extends Person as person { subject: String });

impl Model for Person {
    const ENTITY_NAME: &'static str = "Person";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .inheritance(InheritanceInfo::joined_table())
            .field(id())
            .field(text("name"))
    }
}

impl Model for Student {
    const ENTITY_NAME: &'static str = "Student";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Person::descriptor)
            .field(text("school"))
    }
}

impl Model for GraduateStudent {
    const ENTITY_NAME: &'static str = "GraduateStudent";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Student::descriptor)
            .field(text("thesis"))
    }
}

impl Model for Teacher {
    const ENTITY_NAME: &'static str = "Teacher";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Person::descriptor)
            .field(text("subject"))
    }
}

// ============================================================================
// Joined with an abstract root: Vehicle (abstract) -> Car -> SportsCar,
// Vehicle -> Truck
// ============================================================================

entity!(Vehicle { make: String });
entity!(Car extends Vehicle as vehicle { doors: i64 });
entity!(SportsCar extends Car as car { top_speed: i64 });
entity!(Truck extends Vehicle as vehicle { payload: f64 });

impl Model for Vehicle {
    const ENTITY_NAME: &'static str = "Vehicle";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .abstract_entity()
            .inheritance(InheritanceInfo::joined_table())
            .field(id())
            .field(text("make"))
    }
}

impl Model for Car {
    const ENTITY_NAME: &'static str = "Car";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Vehicle::descriptor)
            .field(int("doors"))
    }
}

impl Model for SportsCar {
    const ENTITY_NAME: &'static str = "SportsCar";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Car::descriptor)
            .field(int("top_speed"))
    }
}

impl Model for Truck {
    const ENTITY_NAME: &'static str = "Truck";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Vehicle::descriptor)
            .field(real("payload"))
    }
}

// ============================================================================
// Table per concrete class: Animal (abstract) -> Dog, Cat
// ============================================================================

entity!(Animal { name: String });
entity!(Dog extends Animal as animal { breed: String });
entity!(Cat extends Animal as animal { lives: i64 });

impl Model for Animal {
    const ENTITY_NAME: &'static str = "Animal";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .abstract_entity()
            .inheritance(InheritanceInfo::concrete_table())
            .field(id())
            .field(text("name"))
    }
}

impl Model for Dog {
    const ENTITY_NAME: &'static str = "Dog";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Animal::descriptor)
            .field(text("breed"))
    }
}

impl Model for Cat {
    const ENTITY_NAME: &'static str = "Cat";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Animal::descriptor)
            .field(int("lives"))
    }
}

// ============================================================================
// Concrete tables with foreign keys: Product (abstract) -> Book -> SignedBook,
// Product -> Gadget
// ============================================================================

entity!(Product { title: String, price: f64 });
entity!(Book extends Product as product { pages: i64 });
entity!(SignedBook extends Book as book { signer: String });
entity!(Gadget extends Product as product { category: String });

impl Model for Product {
    const ENTITY_NAME: &'static str = "Product";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .abstract_entity()
            .inheritance(InheritanceInfo::concrete_foreign_key())
            .field(id())
            .field(text("title"))
            .field(real("price"))
    }
}

impl Model for Book {
    const ENTITY_NAME: &'static str = "Book";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Product::descriptor)
            .field(int("pages"))
    }
}

impl Model for SignedBook {
    const ENTITY_NAME: &'static str = "SignedBook";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Book::descriptor)
            .field(text("signer"))
    }
}

impl Model for Gadget {
    const ENTITY_NAME: &'static str = "Gadget";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>()
            .extends(Product::descriptor)
            .field(text("category"))
    }
}

// ============================================================================
// Associations: Team 1-* Hero *-* Power
// ============================================================================

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
            .field(text("name"))
            .relationship(RelationshipInfo::one_to_many("heroes", "Hero").back_populates("team"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Hero {
    pub id: Option<i64>,
    pub name: String,
    pub team: Reference,
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
        (field == "team").then_some(&self.team)
    }

    fn reference_mut(&mut self, field: &str) -> Option<&mut Reference> {
        (field == "team").then_some(&mut self.team)
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
            .field(text("name"))
            .relationship(RelationshipInfo::many_to_one("team", "Team").back_populates("heroes"))
            .relationship(RelationshipInfo::many_to_many("powers", "Power"))
    }
}

entity!(Power { name: String });

impl Model for Power {
    const ENTITY_NAME: &'static str = "Power";

    fn descriptor() -> EntityDescriptor {
        EntityDescriptor::of::<Self>().field(id()).field(text("name"))
    }
}

// ============================================================================
// Bootstrap
// ============================================================================

/// Every fixture class, with schema creation on.
pub fn configuration() -> Configuration {
    Configuration::new()
        .set_property("schema.auto", "create")
        .register::<Manager>()
        .register::<Director>()
        .register::<Engineer>()
        .register::<GraduateStudent>()
        .register::<Teacher>()
        .register::<SportsCar>()
        .register::<Truck>()
        .register::<Dog>()
        .register::<Cat>()
        .register::<SignedBook>()
        .register::<Gadget>()
        .register::<Team>()
        .register::<Hero>()
        .register::<Power>()
}

pub fn factory() -> SessionFactory {
    configuration().build_session_factory().unwrap()
}

/// A session over a fresh in-memory database with the schema created.
pub fn open() -> Session<SqliteConnection> {
    factory()
        .open_session(SqliteConnection::open_memory().unwrap())
        .unwrap()
}

/// A session over a database file in `dir`, for tests that inspect the
/// stored rows through a second connection.
pub fn open_file(dir: &TempDir) -> (Session<SqliteConnection>, PathBuf) {
    let path = dir.path().join("strata.db");
    let conn = SqliteConnection::open(&path).unwrap();
    (factory().open_session(conn).unwrap(), path)
}

/// Count rows of a table through a separate connection.
pub fn count_rows(path: &Path, table: &str) -> i64 {
    let mut conn = SqliteConnection::open(path).unwrap();
    let row = conn
        .query_one(&format!("SELECT COUNT(*) FROM \"{table}\""), &[])
        .unwrap()
        .unwrap();
    row.get_as::<i64>(0).unwrap()
}

pub fn table_exists(path: &Path, table: &str) -> bool {
    let mut conn = SqliteConnection::open(path).unwrap();
    let row = conn
        .query_one(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
            &[Value::from(table)],
        )
        .unwrap()
        .unwrap();
    row.get_as::<i64>(0).unwrap() == 1
}

pub fn engineer(name: &str, language: &str) -> Engineer {
    Engineer {
        employee: Employee {
            id: None,
            name: name.into(),
        },
        language: language.into(),
    }
}

pub fn manager(name: &str, budget: f64) -> Manager {
    Manager {
        employee: Employee {
            id: None,
            name: name.into(),
        },
        budget,
    }
}

pub fn gadget(title: &str, price: f64, category: &str) -> Gadget {
    Gadget {
        product: Product {
            id: None,
            title: title.into(),
            price,
        },
        category: category.into(),
    }
}
