//! Film-work query, mapping, and transformer.
//!
//! One source row already aggregates its genres and cast server-side
//! (§4.2d); the transformer here only reshapes that one row into the
//! denormalized document shape, partitioning `persons` by role three
//! times over. `persons` is read by key throughout — there is no
//! positional access anywhere in this file.

use serde_json::{json, Map, Value};
use sync_core::{Document, PipelineConfig, Row, Transformer};

/// Contract-shaped query: strict `>` on the watermark column, ascending
/// order, limit to batch size, aggregation done server-side so one row
/// is one complete film-work (§4.2).
pub const QUERY: &str = "\
SELECT
    fw.id,
    fw.title,
    fw.description,
    fw.rating AS imdb_rating,
    fw.modified,
    COALESCE(genres_agg.genres, '[]'::jsonb) AS genres,
    COALESCE(persons_agg.persons, '[]'::jsonb) AS persons
FROM content.film_work fw
LEFT JOIN LATERAL (
    SELECT jsonb_agg(g.name) AS genres
    FROM content.genre_film_work gfw
    JOIN content.genre g ON g.id = gfw.genre_id
    WHERE gfw.film_work_id = fw.id
) genres_agg ON true
LEFT JOIN LATERAL (
    SELECT jsonb_agg(jsonb_build_object(
        'person_id', p.id,
        'person_name', p.full_name,
        'person_role', pfw.role
    )) AS persons
    FROM content.person_film_work pfw
    JOIN content.person p ON p.id = pfw.person_id
    WHERE pfw.film_work_id = fw.id
) persons_agg ON true
WHERE fw.modified > $1
ORDER BY fw.modified ASC
LIMIT $2";

pub fn index_mapping() -> Value {
    json!({
        "settings": {
            "refresh_interval": "1s",
            "analysis": {
                "filter": {
                    "english_stemmer": { "type": "stemmer", "language": "english" },
                    "russian_stemmer": { "type": "stemmer", "language": "russian" }
                },
                "analyzer": {
                    "ru_en": {
                        "tokenizer": "standard",
                        "filter": ["lowercase", "english_stemmer", "russian_stemmer"]
                    }
                }
            }
        },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                "id": { "type": "keyword" },
                "imdb_rating": { "type": "float" },
                "genres": { "type": "text", "analyzer": "ru_en" },
                "title": { "type": "text", "analyzer": "ru_en" },
                "description": { "type": "text", "analyzer": "ru_en" },
                "directors_names": { "type": "text", "analyzer": "ru_en" },
                "actors_names": { "type": "text", "analyzer": "ru_en" },
                "writers_names": { "type": "text", "analyzer": "ru_en" },
                "directors": {
                    "type": "nested",
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text", "analyzer": "ru_en" }
                    }
                },
                "actors": {
                    "type": "nested",
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text", "analyzer": "ru_en" }
                    }
                },
                "writers": {
                    "type": "nested",
                    "properties": {
                        "id": { "type": "keyword" },
                        "name": { "type": "text", "analyzer": "ru_en" }
                    }
                }
            }
        }
    })
}

pub fn pipeline_config(index_name: String, default_sync_time: String, sleep_secs: u64, batch_size: u32) -> PipelineConfig {
    PipelineConfig {
        name: "filmwork".to_string(),
        watermark_key: "last_synced_time_filmwork".to_string(),
        index_name,
        index_mapping: index_mapping(),
        default_sync_time,
        default_sleep_time: std::time::Duration::from_secs(sleep_secs),
        batch_size,
    }
}

/// Names of the three cast roles, persons are partitioned by.
const DIRECTOR: &str = "director";
const ACTOR: &str = "actor";
const WRITER: &str = "writer";

pub struct FilmWorkTransformer {
    index_name: String,
}

impl FilmWorkTransformer {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }
}

fn names_for_role(persons: &[Value], role: &str) -> Vec<Value> {
    persons
        .iter()
        .filter(|p| p.get("person_role").and_then(Value::as_str) == Some(role))
        .map(|p| {
            p.get("person_name")
                .cloned()
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn people_for_role(persons: &[Value], role: &str) -> Vec<Value> {
    persons
        .iter()
        .filter(|p| p.get("person_role").and_then(Value::as_str) == Some(role))
        .map(|p| {
            json!({
                "id": p.get("person_id").cloned().unwrap_or(Value::Null),
                "name": p.get("person_name").cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

impl Transformer for FilmWorkTransformer {
    fn transform(&self, rows: Vec<Row>) -> Box<dyn Iterator<Item = Document> + Send> {
        let index_name = self.index_name.clone();
        let iter = rows.into_iter().map(move |row| {
            let id = row.get_str("id").unwrap_or_default().to_string();
            let persons = row.get_array("persons").cloned().unwrap_or_default();

            let mut source = Map::new();
            source.insert("id".to_string(), row.get("id").cloned().unwrap_or(Value::Null));
            source.insert("imdb_rating".to_string(), row.get("imdb_rating").cloned().unwrap_or(Value::Null));
            source.insert("genres".to_string(), row.get("genres").cloned().unwrap_or(Value::Array(vec![])));
            source.insert("title".to_string(), row.get("title").cloned().unwrap_or(Value::Null));
            source.insert("description".to_string(), row.get("description").cloned().unwrap_or(Value::Null));
            source.insert("directors_names".to_string(), Value::Array(names_for_role(&persons, DIRECTOR)));
            source.insert("actors_names".to_string(), Value::Array(names_for_role(&persons, ACTOR)));
            source.insert("writers_names".to_string(), Value::Array(names_for_role(&persons, WRITER)));
            source.insert("directors".to_string(), Value::Array(people_for_role(&persons, DIRECTOR)));
            source.insert("actors".to_string(), Value::Array(people_for_role(&persons, ACTOR)));
            source.insert("writers".to_string(), Value::Array(people_for_role(&persons, WRITER)));

            Document::new(index_name.clone(), id, Value::Object(source))
        });
        Box::new(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_from(value: Value) -> Row {
        let Value::Object(map) = value else { unreachable!() };
        Row::new(map)
    }

    #[test]
    fn partitions_persons_by_role_into_names_and_nested_objects() {
        let row = row_from(json!({
            "id": "film-1",
            "imdb_rating": 8.5,
            "genres": ["Drama"],
            "title": "A Film",
            "description": "About things",
            "persons": [
                {"person_id": "p-1", "person_name": "X", "person_role": "director"},
                {"person_id": "p-2", "person_name": "Y", "person_role": "actor"},
            ],
        }));

        let transformer = FilmWorkTransformer::new("movies");
        let docs: Vec<Document> = transformer.transform(vec![row]).collect();
        assert_eq!(docs.len(), 1);

        let doc = &docs[0];
        assert_eq!(doc.id, "film-1");
        assert_eq!(doc.index, "movies");
        assert_eq!(doc.source["directors_names"], json!(["X"]));
        assert_eq!(doc.source["actors_names"], json!(["Y"]));
        assert_eq!(doc.source["writers_names"], json!([]));
        assert_eq!(
            doc.source["directors"],
            json!([{"id": "p-1", "name": "X"}])
        );
    }

    #[test]
    fn missing_persons_field_yields_empty_role_arrays() {
        let row = row_from(json!({
            "id": "film-2",
            "imdb_rating": 7.0,
            "genres": ["Comedy"],
            "title": "B Film",
            "description": "Nothing",
        }));

        let transformer = FilmWorkTransformer::new("movies");
        let docs: Vec<Document> = transformer.transform(vec![row]).collect();
        assert_eq!(docs[0].source["directors"], json!([]));
        assert_eq!(docs[0].source["writers_names"], json!([]));
    }
}
