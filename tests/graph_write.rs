use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use taxis::adapters::memory::MemoryAdapter;
use taxis::graph::OptionValue;
use taxis::{Engine, GraphOption, GraphOptions, GraphProcessor, GraphSettings, GraphWriteMode, Schema};

fn schema() -> Schema {
    Schema::from_json(
        r#"{
            "Person": {
                "properties": { "name": "string" },
                "relations": {
                    "pets": { "relation": "hasMany", "model": "Animal", "from": "id", "to": "ownerId" },
                    "movies": {
                        "relation": "manyToMany", "model": "Movie", "from": "id", "to": "id",
                        "through": { "table": "Person_Movie", "from": "personId", "to": "movieId" },
                        "graphOptions": { "relate": false }
                    },
                    "address": {
                        "relation": "hasOne", "model": "Address", "from": "id", "to": "personId",
                        "owner": true
                    }
                }
            },
            "Animal": {
                "properties": { "name": "string", "ownerId": "integer" },
                "relations": {
                    "toys": { "relation": "hasMany", "model": "Toy", "from": "id", "to": "animalId" }
                }
            },
            "Movie": { "properties": { "name": "string" } },
            "Address": { "properties": { "street": "string", "personId": "integer" } },
            "Toy": { "properties": { "name": "string", "animalId": "integer" } }
        }"#,
    )
    .unwrap()
}

fn payload() -> Value {
    json!({
        "name": "Jennifer",
        "pets": [{ "id": 4, "name": "Doggo", "toys": [{ "name": "Ball" }] }],
        "movies": [{ "id": 9, "name": "Heat" }]
    })
}

fn engine(adapter: &MemoryAdapter) -> Engine {
    Engine::builder(schema(), Box::new(adapter.clone()))
        .writer(Box::new(adapter.clone()))
        .build()
}

#[test]
fn relation_overrides_keep_full_data() {
    let schema = schema();
    let processor = GraphProcessor::process(
        &schema,
        "Person",
        &payload(),
        GraphOptions::new().relate(true),
        GraphSettings::default(),
    )
    .unwrap();

    assert_eq!(
        processor.data(),
        json!({
            "name": "Jennifer",
            "pets": [{ "id": 4 }],
            "movies": [{ "id": 9, "name": "Heat" }]
        })
    );
    assert!(processor.should_relate("pets"));
    assert!(!processor.should_relate("movies"));

    let restored = processor.restore_relations(json!({
        "id": 1,
        "name": "Jennifer",
        "pets": [{ "id": 4 }],
        "movies": [{ "id": 9, "name": "Heat" }]
    }));
    assert_eq!(
        restored,
        json!({
            "id": 1,
            "name": "Jennifer",
            "pets": [{ "id": 4, "toys": [{ "name": "Ball" }] }],
            "movies": [{ "id": 9, "name": "Heat" }]
        })
    );
}

#[test]
fn repeated_reads_are_stable() {
    let schema = schema();
    let processor = GraphProcessor::process(
        &schema,
        "Person",
        &payload(),
        GraphOptions::new().relate(true),
        GraphSettings::default(),
    )
    .unwrap();

    assert_eq!(processor.data(), processor.data());
    assert_eq!(processor.options(), processor.options());
    assert_eq!(processor.removed_relations().len(), 1);
}

#[test]
fn owner_relations_are_always_written() {
    let schema = schema();
    let data = json!({ "name": "Jennifer", "address": { "id": 3, "street": "Main St" } });
    let processor = GraphProcessor::process(
        &schema,
        "Person",
        &data,
        GraphOptions::new().relate(true),
        GraphSettings::default(),
    )
    .unwrap();

    assert!(!processor.should_relate("address"));
    assert_eq!(processor.data(), data);
    assert_eq!(
        processor.options().get(GraphOption::Unrelate),
        Some(&OptionValue::Paths(Vec::new()))
    );
}

#[test]
fn restoring_can_be_switched_off() {
    let schema = schema();
    let settings = GraphSettings {
        restore_relations: false,
        ..Default::default()
    };
    let processor = GraphProcessor::process(
        &schema,
        "Person",
        &payload(),
        GraphOptions::new().relate(true),
        settings,
    )
    .unwrap();

    assert!(processor.removed_relations().is_empty());
    let result = json!({ "id": 1, "pets": [{ "id": 4 }] });
    assert_eq!(processor.restore_relations(result.clone()), result);
}

#[tokio::test]
async fn insert_relates_and_restores_through_engine() {
    let adapter = MemoryAdapter::new();
    let engine = engine(&adapter);

    let result = engine
        .write_graph("Person", payload(), GraphWriteMode::Insert, &GraphOptions::new())
        .await
        .unwrap();

    assert_eq!(
        result,
        json!({
            "id": 1,
            "name": "Jennifer",
            "pets": [{ "id": 4, "toys": [{ "name": "Ball" }] }],
            "movies": [{ "id": 9, "name": "Heat" }]
        })
    );

    let writes = adapter.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].mode, GraphWriteMode::Insert);
    assert_eq!(
        writes[0].data,
        json!({ "name": "Jennifer", "pets": [{ "id": 4 }], "movies": [{ "id": 9, "name": "Heat" }] })
    );
    assert_eq!(
        writes[0].options.get(GraphOption::Relate),
        Some(&OptionValue::Paths(vec!["pets".to_string(), "pets.toys".to_string()]))
    );
}

#[tokio::test]
async fn caller_options_merge_over_mode_defaults() {
    let adapter = MemoryAdapter::new();
    let engine = engine(&adapter);

    let result = engine
        .write_graph(
            "Person",
            payload(),
            GraphWriteMode::Upsert,
            &GraphOptions::new().relate(false),
        )
        .await
        .unwrap();

    // nothing was related, so the pet is written with its toys
    assert_eq!(result["pets"][0]["toys"][0]["id"], json!(2));

    let options = &adapter.writes()[0].options;
    assert_eq!(options.get(GraphOption::Relate), Some(&OptionValue::Enabled(false)));
    assert_eq!(options.get(GraphOption::InsertMissing), Some(&OptionValue::Enabled(true)));
}

#[tokio::test]
async fn array_payloads_keep_their_shape() {
    let adapter = MemoryAdapter::new();
    let engine = engine(&adapter);

    let result = engine
        .write_graph(
            "Person",
            json!([{ "name": "Ann" }, { "name": "Bob" }]),
            GraphWriteMode::Insert,
            &GraphOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(result, json!([{ "id": 1, "name": "Ann" }, { "id": 2, "name": "Bob" }]));
    assert_eq!(adapter.rows("Person").len(), 2);
}
