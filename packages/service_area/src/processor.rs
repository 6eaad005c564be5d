//! Per-event enrichment.
//!
//! [`ServiceAreaCalculator::process`] validates the input point, asks the
//! solver for its service area, and places the polygon according to the
//! stage's [`Placement`]. Events that cannot be enriched are logged and
//! dropped; nothing partial is ever emitted.

use std::sync::Arc;

use service_area_models::{
    Event, EventProperty, FieldType, FieldValue, MapGeometry, MapPoint, MapPolygon, Schema,
};

use crate::ServiceAreaError;
use crate::config::{Placement, StageConfig};
use crate::registry::{ConnectionProvider, SchemaRegistry};
use crate::request::{build_facility_payload, build_request};
use crate::response::{self, SolveOutcome};
use crate::schema_cache::SchemaCache;
use crate::transport::SolverTransport;

/// Enriches point events with drive-time service area polygons.
pub struct ServiceAreaCalculator {
    id: String,
    config: StageConfig,
    connections: Arc<dyn ConnectionProvider>,
    transport: Arc<dyn SolverTransport>,
    schema_cache: Option<SchemaCache>,
}

impl ServiceAreaCalculator {
    /// Creates a stage with a generated id.
    #[must_use]
    pub fn new(
        config: StageConfig,
        registry: Arc<dyn SchemaRegistry>,
        connections: Arc<dyn ConnectionProvider>,
        transport: Arc<dyn SolverTransport>,
    ) -> Self {
        Self::with_id(
            uuid::Uuid::new_v4().to_string(),
            config,
            registry,
            connections,
            transport,
        )
    }

    /// Creates a stage with an explicit id. The id becomes the owner of
    /// every schema the stage derives.
    #[must_use]
    pub fn with_id(
        id: impl Into<String>,
        config: StageConfig,
        registry: Arc<dyn SchemaRegistry>,
        connections: Arc<dyn ConnectionProvider>,
        transport: Arc<dyn SolverTransport>,
    ) -> Self {
        let id = id.into();
        let schema_cache = match &config.placement {
            Placement::ReplaceInput => None,
            Placement::OutputField { field, schema_name } => Some(SchemaCache::new(
                registry,
                id.clone(),
                field.clone(),
                schema_name.clone(),
            )),
        };

        Self {
            id,
            config,
            connections,
            transport,
            schema_cache,
        }
    }

    /// Stage id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stage configuration.
    #[must_use]
    pub const fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Output schema cache; `None` when replacing in place.
    #[must_use]
    pub const fn schema_cache(&self) -> Option<&SchemaCache> {
        self.schema_cache.as_ref()
    }

    /// Enriches one event.
    ///
    /// Returns `None` when the event is dropped. The reason is logged,
    /// with the event's track id when it has one.
    pub async fn process(&self, event: Event) -> Option<Event> {
        let track_id = event.track_id().map(str::to_string);

        match self.try_process(event).await {
            Ok(enriched) => enriched,
            Err(e) => {
                match track_id {
                    Some(track_id) => {
                        log::error!("Unable to compute service area for track {track_id}: {e}");
                    }
                    None => log::error!("Unable to compute service area: {e}"),
                }
                None
            }
        }
    }

    /// Enriches one event, surfacing the failure reason.
    ///
    /// Returns `Ok(None)` when the solver produced no service area.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceAreaError`] if the input field does not hold a
    /// point, the solver call fails, or the polygon cannot be placed.
    pub async fn try_process(&self, event: Event) -> Result<Option<Event>, ServiceAreaError> {
        let point = self.input_point(&event)?.clone();

        match self.compute(&point).await? {
            SolveOutcome::Polygon(polygon) => self.place(event, polygon).map(Some),
            SolveOutcome::NoResult => {
                log::warn!(
                    "No service area returned for event of schema '{}'; dropping it",
                    event.schema().name()
                );
                Ok(None)
            }
        }
    }

    /// Calls the solver for the service area around `point`.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceAreaError`] if the connection is unknown, the
    /// request fails, or the reply cannot be interpreted.
    pub async fn compute(&self, point: &MapPoint) -> Result<SolveOutcome, ServiceAreaError> {
        let connection = self
            .connections
            .connection(&self.config.connection)
            .ok_or_else(|| ServiceAreaError::UnknownConnection {
                name: self.config.connection.clone(),
            })?;

        let facilities = build_facility_payload(point)?;
        let request = build_request(&connection, facilities, &self.config);
        let body = self.transport.execute(&request).await?;

        response::parse(&body)
    }

    /// Deletes every output schema the stage derived.
    pub fn shutdown(&self) {
        if let Some(cache) = &self.schema_cache {
            let failures = cache.clear_all();
            if failures > 0 {
                log::warn!("{failures} output schema(s) could not be deleted during shutdown");
            }
        }
    }

    fn input_point<'a>(&self, event: &'a Event) -> Result<&'a MapPoint, ServiceAreaError> {
        let field = &self.config.input_field;
        let is_geometry = event
            .schema()
            .field(field)
            .is_some_and(|f| f.field_type == FieldType::Geometry);

        event
            .field(field)
            .filter(|_| is_geometry)
            .and_then(FieldValue::as_geometry)
            .and_then(MapGeometry::as_point)
            .ok_or_else(|| ServiceAreaError::InputFieldType {
                field: field.clone(),
            })
    }

    fn place(&self, mut event: Event, polygon: MapPolygon) -> Result<Event, ServiceAreaError> {
        let value = FieldValue::Geometry(MapGeometry::Polygon(polygon));

        let Placement::OutputField { field, schema_name } = &self.config.placement else {
            event.set_field(&self.config.input_field, value)?;
            return Ok(event);
        };

        match event.schema().field(field).map(|f| f.field_type) {
            Some(FieldType::Geometry) if schema_name.is_none() => {
                event.set_field(field, value)?;
                Ok(event)
            }
            Some(FieldType::Geometry) => {
                let schema = self.output_schema(event.schema())?;
                let mut enriched = copy_event(&event, schema, None)?;
                enriched.set_field(field, value)?;
                Ok(enriched)
            }
            Some(_) => Err(ServiceAreaError::OutputFieldType {
                field: field.clone(),
            }),
            None => {
                let schema = self.output_schema(event.schema())?;
                copy_event(&event, schema, Some(value))
            }
        }
    }

    fn output_schema(&self, input: &Schema) -> Result<Arc<Schema>, ServiceAreaError> {
        self.schema_cache
            .as_ref()
            .ok_or_else(|| ServiceAreaError::Configuration {
                message: "output schema requested while replacing in place".to_string(),
            })?
            .resolve(input)
    }
}

/// Builds an event under `schema` from `source`'s values, with `extra`
/// appended, and carries the source's metadata across. Properties
/// already set on the new event are kept.
fn copy_event(
    source: &Event,
    schema: Arc<Schema>,
    extra: Option<FieldValue>,
) -> Result<Event, ServiceAreaError> {
    let mut values = source.values().to_vec();
    values.extend(extra);

    let mut event = Event::new(schema, values)?;

    for key in [
        EventProperty::Type,
        EventProperty::OwnerId,
        EventProperty::OwnerUri,
    ] {
        if let Some(value) = source.property(&key) {
            event.set_property(key, value);
        }
    }

    for (key, value) in source.properties() {
        if !event.has_property(key) {
            event.set_property(key.clone(), value);
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;
    use service_area_models::definition::StageDefinition;
    use service_area_models::{FieldDefinition, SpatialReference, TRACK_ID_TAG};

    use crate::registry::{InMemorySchemaRegistry, ServerConnection, StaticConnections};
    use crate::request::SolverRequest;
    use crate::transport::TransportError;

    use super::*;

    /// Replies with a canned body and records every request.
    struct FakeTransport {
        reply: Result<String, u16>,
        requests: Mutex<Vec<SolverRequest>>,
    }

    impl FakeTransport {
        fn replying(body: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(body.to_string()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn failing(status: u16) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(status),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SolverTransport for FakeTransport {
        async fn execute(&self, request: &SolverRequest) -> Result<String, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            match &self.reply {
                Ok(body) => Ok(body.clone()),
                Err(status) => Err(TransportError::Status {
                    status: *status,
                    body: String::new(),
                }),
            }
        }
    }

    fn service_area_reply() -> serde_json::Value {
        json!({
            "saPolygons": {
                "spatialReference": { "wkid": 4326 },
                "features": [{
                    "attributes": { "FacilityID": 1, "FromBreak": 0, "ToBreak": 2 },
                    "geometry": {
                        "rings": [[
                            [-117.20, 34.04], [-117.20, 34.06], [-117.18, 34.06],
                            [-117.18, 34.04], [-117.20, 34.04]
                        ]]
                    }
                }]
            }
        })
    }

    fn expected_polygon() -> MapGeometry {
        let reply = service_area_reply();
        let SolveOutcome::Polygon(polygon) = response::parse(&reply.to_string()).unwrap() else {
            panic!("fixture reply has a polygon");
        };
        MapGeometry::Polygon(polygon)
    }

    fn vehicles_schema(extra: Option<FieldDefinition>) -> Arc<Schema> {
        let mut fields = vec![
            FieldDefinition::new("TRACK_ID", FieldType::String).with_tag(TRACK_ID_TAG),
            FieldDefinition::new("SPEED", FieldType::Double),
            FieldDefinition::new("GEOMETRY", FieldType::Geometry),
        ];
        fields.extend(extra);
        Arc::new(Schema::new("vehicles", fields))
    }

    fn vehicle_event(schema: Arc<Schema>) -> Event {
        let point = MapPoint::new(-117.19, 34.05, Some(SpatialReference::wgs84())).with_z(400.0);
        let mut values = vec![
            FieldValue::String("truck-7".to_string()),
            FieldValue::Double(42.0),
            FieldValue::Geometry(point.into()),
        ];
        values.resize(schema.fields().len(), FieldValue::Null);

        let mut event = Event::new(schema, values).unwrap();
        event.set_property(EventProperty::Type, "vehicle");
        event.set_property(EventProperty::OwnerId, "input-1");
        event.set_property(EventProperty::OwnerUri, "tcp://feeds/vehicles");
        event.set_property(EventProperty::Custom("priority".to_string()), "high");
        event
    }

    fn connections() -> Arc<StaticConnections> {
        Arc::new(StaticConnections::new().with(
            "arcgis",
            ServerConnection {
                url: "https://example.com/arcgis/".to_string(),
                token: Some("abc123".to_string()),
                referer: "geoevent".to_string(),
            },
        ))
    }

    fn stage(
        def: &StageDefinition,
        registry: &Arc<InMemorySchemaRegistry>,
        transport: &Arc<FakeTransport>,
    ) -> ServiceAreaCalculator {
        ServiceAreaCalculator::with_id(
            "stage-1",
            StageConfig::from_definition(def).unwrap(),
            Arc::clone(registry) as Arc<dyn SchemaRegistry>,
            connections(),
            Arc::clone(transport) as Arc<dyn SolverTransport>,
        )
    }

    fn output_definition(field: &str, schema_name: &str) -> StageDefinition {
        let mut def = StageDefinition::new("arcgis");
        def.replace_geometry = false;
        def.output_field = field.to_string();
        def.output_schema_name = schema_name.to_string();
        def
    }

    #[tokio::test]
    async fn replace_in_place_overwrites_input_geometry() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&StageDefinition::new("arcgis"), &registry, &transport);
        let schema = vehicles_schema(None);

        let enriched = calculator
            .process(vehicle_event(Arc::clone(&schema)))
            .await
            .unwrap();

        assert_eq!(enriched.schema_id(), schema.id());
        assert_eq!(
            enriched.field("GEOMETRY"),
            Some(&FieldValue::Geometry(expected_polygon()))
        );
        assert_eq!(enriched.field("SPEED"), Some(&FieldValue::Double(42.0)));
        assert!(registry.is_empty());
        assert!(calculator.schema_cache().is_none());
    }

    #[tokio::test]
    async fn request_is_built_from_the_event_point() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&StageDefinition::new("arcgis"), &registry, &transport);

        calculator.process(vehicle_event(vehicles_schema(None))).await.unwrap();

        let requests = transport.requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.url.starts_with("https://example.com/arcgis/rest/services/"));
        assert_eq!(request.param("token"), Some("abc123"));
        assert_eq!(request.referer, "geoevent");

        let facilities: serde_json::Value =
            serde_json::from_str(request.param("facilities").unwrap()).unwrap();
        let geometry = &facilities["features"][0]["geometry"];
        assert_eq!(geometry["x"], json!(-117.19));
        assert!(geometry.get("z").is_none());
    }

    #[tokio::test]
    async fn new_output_field_derives_schema_and_copies_properties() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&output_definition("SERVICE_AREA", ""), &registry, &transport);
        let schema = vehicles_schema(None);

        let enriched = calculator
            .process(vehicle_event(Arc::clone(&schema)))
            .await
            .unwrap();

        assert_ne!(enriched.schema_id(), schema.id());
        assert_eq!(enriched.schema().fields().len(), schema.fields().len() + 1);
        assert_eq!(enriched.schema().owner(), Some("stage-1"));
        assert_eq!(registry.is_temporary(enriched.schema_id()), Some(true));
        assert_eq!(
            enriched.field("SERVICE_AREA"),
            Some(&FieldValue::Geometry(expected_polygon()))
        );
        assert_eq!(
            enriched.field("TRACK_ID").and_then(FieldValue::as_str),
            Some("truck-7")
        );
        assert!(
            enriched
                .field("GEOMETRY")
                .and_then(FieldValue::as_geometry)
                .is_some_and(|g| g.as_point().is_some())
        );

        assert_eq!(enriched.property(&EventProperty::Type), Some("vehicle"));
        assert_eq!(enriched.property(&EventProperty::OwnerId), Some("input-1"));
        assert_eq!(
            enriched.property(&EventProperty::OwnerUri),
            Some("tcp://feeds/vehicles")
        );
        assert_eq!(
            enriched.property(&EventProperty::Custom("priority".to_string())),
            Some("high")
        );
    }

    #[tokio::test]
    async fn derived_schema_is_reused_across_events() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&output_definition("SERVICE_AREA", ""), &registry, &transport);
        let schema = vehicles_schema(None);

        let first = calculator.process(vehicle_event(Arc::clone(&schema))).await.unwrap();
        let second = calculator.process(vehicle_event(Arc::clone(&schema))).await.unwrap();

        assert_eq!(first.schema_id(), second.schema_id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn existing_output_field_is_set_in_place() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&output_definition("SERVICE_AREA", ""), &registry, &transport);
        let schema = vehicles_schema(Some(FieldDefinition::new(
            "SERVICE_AREA",
            FieldType::Geometry,
        )));

        let enriched = calculator
            .process(vehicle_event(Arc::clone(&schema)))
            .await
            .unwrap();

        assert_eq!(enriched.schema_id(), schema.id());
        assert_eq!(
            enriched.field("SERVICE_AREA"),
            Some(&FieldValue::Geometry(expected_polygon()))
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn existing_output_field_with_schema_name_gets_renamed_schema() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(
            &output_definition("SERVICE_AREA", "vehicle-areas"),
            &registry,
            &transport,
        );
        let schema = vehicles_schema(Some(FieldDefinition::new(
            "SERVICE_AREA",
            FieldType::Geometry,
        )));

        let enriched = calculator
            .process(vehicle_event(Arc::clone(&schema)))
            .await
            .unwrap();

        assert_ne!(enriched.schema_id(), schema.id());
        assert_eq!(enriched.schema().name(), "vehicle-areas");
        assert_eq!(enriched.schema().fields(), schema.fields());
        assert_eq!(registry.is_temporary(enriched.schema_id()), Some(false));
        assert_eq!(
            enriched.field("SERVICE_AREA"),
            Some(&FieldValue::Geometry(expected_polygon()))
        );
        assert_eq!(enriched.property(&EventProperty::Type), Some("vehicle"));
    }

    #[tokio::test]
    async fn non_geometry_output_field_is_rejected() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&output_definition("SPEED", ""), &registry, &transport);

        let err = calculator
            .try_process(vehicle_event(vehicles_schema(None)))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceAreaError::OutputFieldType { .. }));
    }

    #[tokio::test]
    async fn non_point_input_is_rejected_without_calling_solver() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let mut def = StageDefinition::new("arcgis");
        def.input_field = "SPEED".to_string();
        let calculator = stage(&def, &registry, &transport);

        let err = calculator
            .try_process(vehicle_event(vehicles_schema(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceAreaError::InputFieldType { .. }));

        let mut missing = StageDefinition::new("arcgis");
        missing.input_field = "LOCATION".to_string();
        let calculator = stage(&missing, &registry, &transport);
        assert!(calculator.process(vehicle_event(vehicles_schema(None))).await.is_none());

        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn solver_failures_drop_the_event() {
        let registry = Arc::new(InMemorySchemaRegistry::new());

        let failing = FakeTransport::failing(503);
        let calculator = stage(&StageDefinition::new("arcgis"), &registry, &failing);
        let err = calculator
            .try_process(vehicle_event(vehicles_schema(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceAreaError::Transport(_)));

        let empty = FakeTransport::replying(json!({
            "saPolygons": { "spatialReference": { "wkid": 4326 }, "features": [] }
        }));
        let calculator = stage(&StageDefinition::new("arcgis"), &registry, &empty);
        assert!(calculator.process(vehicle_event(vehicles_schema(None))).await.is_none());
    }

    #[tokio::test]
    async fn missing_service_area_drops_without_error() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(json!({ "messages": [] }));
        let calculator = stage(&StageDefinition::new("arcgis"), &registry, &transport);

        let outcome = calculator
            .try_process(vehicle_event(vehicles_schema(None)))
            .await
            .unwrap();
        assert!(outcome.is_none());
    }

    #[tokio::test]
    async fn unknown_connection_fails_the_event() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&StageDefinition::new("elsewhere"), &registry, &transport);

        let err = calculator
            .try_process(vehicle_event(vehicles_schema(None)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceAreaError::UnknownConnection { .. }));
    }

    #[tokio::test]
    async fn shutdown_deletes_derived_schemas() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = stage(&output_definition("SERVICE_AREA", ""), &registry, &transport);

        calculator.process(vehicle_event(vehicles_schema(None))).await.unwrap();
        assert_eq!(registry.len(), 1);

        calculator.shutdown();

        assert!(registry.is_empty());
        assert!(calculator.schema_cache().is_some_and(SchemaCache::is_empty));
    }

    #[tokio::test]
    async fn concurrent_events_share_one_derived_schema() {
        let registry = Arc::new(InMemorySchemaRegistry::new());
        let transport = FakeTransport::replying(service_area_reply());
        let calculator = Arc::new(stage(
            &output_definition("SERVICE_AREA", ""),
            &registry,
            &transport,
        ));
        let schema = vehicles_schema(None);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let calculator = Arc::clone(&calculator);
                let event = vehicle_event(Arc::clone(&schema));
                tokio::spawn(async move { calculator.process(event).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().schema_id().clone());
        }

        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }
}
