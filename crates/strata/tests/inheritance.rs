//! Round trips through every inheritance layout on SQLite.

mod common;

use std::collections::HashSet;

use common::*;
use strata::prelude::*;
use tempfile::TempDir;

fn names(entities: &[Box<dyn Entity>]) -> Vec<&'static str> {
    let mut names: Vec<_> = entities.iter().map(|e| e.entity_name()).collect();
    names.sort_unstable();
    names
}

// ============================================================================
// Single table
// ============================================================================

#[test]
fn test_single_table_round_trip() {
    let session = open();
    let handle = session.save(&manager("Grace", 1200.5)).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);
    session.clear();

    let loaded: Manager = session.get(id).unwrap().unwrap();
    assert_eq!(loaded.employee.name, "Grace");
    assert!((loaded.budget - 1200.5).abs() < f64::EPSILON);
}

#[test]
fn test_single_table_discriminator_picks_runtime_class() {
    let session = open();
    let director = Director {
        manager: manager("Ada", 10.0),
        region: "EMEA".into(),
    };
    let handle = session.save(&director).unwrap();
    session.save(&engineer("Linus", "C")).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);
    session.clear();

    let found = session.find("Employee", id.clone()).unwrap().unwrap();
    assert_eq!(found.entity_name(), "Director");
    let found: Director = downcast(found).unwrap();
    assert_eq!(found.region, "EMEA");
    assert_eq!(found.manager.employee.name, "Ada");

    // A sibling class never matches.
    assert!(session.find("Engineer", id).unwrap().is_none());
}

#[test]
fn test_single_table_polymorphic_queries() {
    let session = open();
    session.save(&manager("M", 1.0)).unwrap();
    session
        .save(&Director {
            manager: manager("D", 2.0),
            region: "APAC".into(),
        })
        .unwrap();
    session.save(&engineer("E", "Rust")).unwrap();
    session
        .save(&Employee {
            id: None,
            name: "Plain".into(),
        })
        .unwrap();
    session.commit().unwrap();
    session.clear();

    let all = session.find_all("Employee").unwrap();
    assert_eq!(names(&all), ["Director", "Employee", "Engineer", "Manager"]);
    let managers = session.find_all("Manager").unwrap();
    assert_eq!(names(&managers), ["Director", "Manager"]);
    assert_eq!(session.find_all("Director").unwrap().len(), 1);
}

#[test]
fn test_single_table_uses_one_table() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    session.save(&manager("M", 1.0)).unwrap();
    session.save(&engineer("E", "Go")).unwrap();
    session.close().unwrap();

    assert_eq!(count_rows(&path, "employee"), 2);
}

// ============================================================================
// Joined
// ============================================================================

fn graduate(name: &str) -> GraduateStudent {
    GraduateStudent {
        student: Student {
            person: Person {
                id: None,
                name: name.into(),
            },
            school: "MIT".into(),
        },
        thesis: "Lattices".into(),
    }
}

#[test]
fn test_joined_round_trip_spans_every_table() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    let handle = session.save(&graduate("Alan")).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);
    session.clear();

    let loaded: GraduateStudent = session.get(id).unwrap().unwrap();
    assert_eq!(loaded.student.person.name, "Alan");
    assert_eq!(loaded.student.school, "MIT");
    assert_eq!(loaded.thesis, "Lattices");
    session.close().unwrap();

    for table in ["person", "student", "graduate_student"] {
        assert_eq!(count_rows(&path, table), 1, "{table}");
    }
    assert_eq!(count_rows(&path, "teacher"), 0);
}

#[test]
fn test_joined_polymorphic_find_all() {
    let session = open();
    session.save(&graduate("G")).unwrap();
    session
        .save(&Teacher {
            person: Person {
                id: None,
                name: "T".into(),
            },
            subject: "Math".into(),
        })
        .unwrap();
    session
        .save(&Person {
            id: None,
            name: "P".into(),
        })
        .unwrap();
    session.commit().unwrap();
    session.clear();

    let all = session.find_all("Person").unwrap();
    assert_eq!(names(&all), ["GraduateStudent", "Person", "Teacher"]);
    let students = session.find_all("Student").unwrap();
    assert_eq!(names(&students), ["GraduateStudent"]);
}

#[test]
fn test_joined_update_and_delete() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    let handle = session.save(&graduate("Kurt")).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);

    let mut loaded: GraduateStudent = session.get(id.clone()).unwrap().unwrap();
    loaded.student.person.name = "Kurt G.".into();
    loaded.thesis = "Incompleteness".into();
    session.update(&loaded).unwrap();
    session.commit().unwrap();
    session.clear();

    let reloaded: GraduateStudent = session.get(id).unwrap().unwrap();
    assert_eq!(reloaded.student.person.name, "Kurt G.");
    assert_eq!(reloaded.thesis, "Incompleteness");

    session.delete(&reloaded).unwrap();
    session.close().unwrap();
    for table in ["person", "student", "graduate_student"] {
        assert_eq!(count_rows(&path, table), 0, "{table}");
    }
}

fn sports_car(make: &str) -> SportsCar {
    SportsCar {
        car: Car {
            vehicle: Vehicle {
                id: None,
                make: make.into(),
            },
            doors: 2,
        },
        top_speed: 320,
    }
}

fn truck(make: &str) -> Truck {
    Truck {
        vehicle: Vehicle {
            id: None,
            make: make.into(),
        },
        payload: 18.5,
    }
}

#[test]
fn test_joined_abstract_root_gets_no_table() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    session.save(&sports_car("Ferrari")).unwrap();
    session.save(&truck("Volvo")).unwrap();
    session
        .save(&Car {
            vehicle: Vehicle {
                id: None,
                make: "Fiat".into(),
            },
            doors: 4,
        })
        .unwrap();
    session.close().unwrap();

    assert!(!table_exists(&path, "vehicle"));
    assert_eq!(count_rows(&path, "car"), 2);
    assert_eq!(count_rows(&path, "sports_car"), 1);
    assert_eq!(count_rows(&path, "truck"), 1);
}

#[test]
fn test_joined_abstract_root_polymorphic_reads() {
    let session = open();
    let fast = session.save(&sports_car("Ferrari")).unwrap();
    let slow = session.save(&truck("Volvo")).unwrap();
    session.commit().unwrap();
    let fast = session.id_of(fast).unwrap().remove(0);
    let slow = session.id_of(slow).unwrap().remove(0);
    assert_ne!(fast, slow);
    session.clear();

    let all = session.find_all("Vehicle").unwrap();
    assert_eq!(names(&all), ["SportsCar", "Truck"]);

    let found = session.find("Vehicle", fast.clone()).unwrap().unwrap();
    let found: SportsCar = downcast(found).unwrap();
    assert_eq!(found.car.vehicle.make, "Ferrari");
    assert_eq!(found.car.doors, 2);
    assert_eq!(found.top_speed, 320);

    assert_eq!(names(&session.find_all("Car").unwrap()), ["SportsCar"]);
    assert!(session.find("Car", slow).unwrap().is_none());

    let err = session
        .save(&Vehicle {
            id: None,
            make: "Generic".into(),
        })
        .unwrap_err();
    assert!(matches!(err, Error::Mapping(_)));
}

// ============================================================================
// Table per concrete class
// ============================================================================

fn dog(name: &str) -> Dog {
    Dog {
        animal: Animal {
            id: None,
            name: name.into(),
        },
        breed: "Collie".into(),
    }
}

fn cat(name: &str) -> Cat {
    Cat {
        animal: Animal {
            id: None,
            name: name.into(),
        },
        lives: 9,
    }
}

#[test]
fn test_table_per_class_ids_are_unique_across_siblings() {
    let session = open();
    let handles = vec![
        session.save(&dog("Rex")).unwrap(),
        session.save(&cat("Tom")).unwrap(),
        session.save(&dog("Fido")).unwrap(),
        session.save(&cat("Felix")).unwrap(),
    ];
    session.commit().unwrap();

    let ids: HashSet<i64> = handles
        .iter()
        .map(|h| session.id_of(*h).unwrap()[0].as_i64().unwrap())
        .collect();
    assert_eq!(ids.len(), 4);
}

#[test]
fn test_table_per_class_explicit_id_is_not_reissued() {
    let session = open();
    let mut rex = dog("Rex");
    rex.animal.id = Some(1);
    session.save(&rex).unwrap();
    let tom = session.save(&cat("Tom")).unwrap();
    session.commit().unwrap();

    let tom_id = session.id_of(tom).unwrap()[0].as_i64().unwrap();
    assert!(tom_id > 1, "cat reused id {tom_id}");
    session.clear();

    assert_eq!(names(&session.find_all("Animal").unwrap()), ["Cat", "Dog"]);
    let found = session.find("Animal", Value::from(1_i64)).unwrap().unwrap();
    assert_eq!(found.entity_name(), "Dog");
}

#[test]
fn test_table_per_class_polymorphic_reads() {
    let session = open();
    let rex = session.save(&dog("Rex")).unwrap();
    let tom = session.save(&cat("Tom")).unwrap();
    session.commit().unwrap();
    let (rex, tom) = (
        session.id_of(rex).unwrap().remove(0),
        session.id_of(tom).unwrap().remove(0),
    );
    session.clear();

    let all = session.find_all("Animal").unwrap();
    assert_eq!(names(&all), ["Cat", "Dog"]);

    let found = session.find("Animal", tom.clone()).unwrap().unwrap();
    let found: Cat = downcast(found).unwrap();
    assert_eq!(found.lives, 9);
    assert_eq!(found.animal.name, "Tom");

    assert!(session.find("Cat", rex.clone()).unwrap().is_none());
    let loaded: Dog = session.get(rex).unwrap().unwrap();
    assert_eq!(loaded.breed, "Collie");
}

#[test]
fn test_table_per_class_abstract_root_cannot_be_saved() {
    let session = open();
    let err = session
        .save(&Animal {
            id: None,
            name: "Blob".into(),
        })
        .unwrap_err();
    assert!(matches!(err, Error::Mapping(_)));
}

// ============================================================================
// Concrete tables with foreign keys
// ============================================================================

fn signed_book(title: &str) -> SignedBook {
    SignedBook {
        book: Book {
            product: Product {
                id: None,
                title: title.into(),
                price: 30.0,
            },
            pages: 320,
        },
        signer: "Knuth".into(),
    }
}

#[test]
fn test_concrete_foreign_key_round_trip() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    let handle = session.save(&signed_book("TAOCP")).unwrap();
    session.save(&gadget("Lamp", 12.0, "home")).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);
    session.clear();

    let found = session.find("Product", id.clone()).unwrap().unwrap();
    assert_eq!(found.entity_name(), "SignedBook");
    let loaded: SignedBook = downcast(found).unwrap();
    assert_eq!(loaded, {
        let mut expected = signed_book("TAOCP");
        expected.book.product.id = id.as_i64();
        expected
    });
    session.close().unwrap();

    assert_eq!(count_rows(&path, "book"), 1);
    assert_eq!(count_rows(&path, "signed_book"), 1);
    assert_eq!(count_rows(&path, "gadget"), 1);
}

#[test]
fn test_concrete_foreign_key_polymorphic_find_all() {
    let session = open();
    session.save(&signed_book("A")).unwrap();
    session
        .save(&Book {
            product: Product {
                id: None,
                title: "B".into(),
                price: 10.0,
            },
            pages: 100,
        })
        .unwrap();
    session.save(&gadget("G", 5.0, "tools")).unwrap();
    session.commit().unwrap();
    session.clear();

    assert_eq!(
        names(&session.find_all("Product").unwrap()),
        ["Book", "Gadget", "SignedBook"]
    );
    assert_eq!(
        names(&session.find_all("Book").unwrap()),
        ["Book", "SignedBook"]
    );
}

#[test]
fn test_concrete_foreign_key_delete_removes_chain() {
    let dir = TempDir::new().unwrap();
    let (session, path) = open_file(&dir);
    let handle = session.save(&signed_book("Gone")).unwrap();
    session.commit().unwrap();
    let id = session.id_of(handle).unwrap().remove(0);

    let loaded: SignedBook = session.get(id).unwrap().unwrap();
    session.delete(&loaded).unwrap();
    session.close().unwrap();

    assert_eq!(count_rows(&path, "book"), 0);
    assert_eq!(count_rows(&path, "signed_book"), 0);
}
