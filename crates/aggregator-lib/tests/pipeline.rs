//! End-to-end pipeline over the in-memory bus with running listeners

use aggregator_lib::bus::{publish_json, InMemoryBus, MessageBus};
use aggregator_lib::engine::{
    AggregatorEngine, BusPublisher, EngineConfig, EngineParts, ListenerConfig, Listeners,
};
use aggregator_lib::health::{components, ComponentStatus, HealthRegistry};
use aggregator_lib::holiday::FixedHolidayCalendar;
use aggregator_lib::registry::StaticModelRegistry;
use aggregator_lib::schedule::StaticScheduleProvider;
use aggregator_lib::update::TripUpdate;
use aggregator_lib::{
    InferenceRequest, InferenceResponse, Model, ObservedTransition, StopTimeInstance, TripDeviation,
    TripInstance, VehicleMonitorResults,
};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: std::time::Duration = std::time::Duration::from_secs(5);

fn stop(id: &str, seq: u32, start: DateTime<Utc>, offset_secs: i64, distance: f64) -> StopTimeInstance {
    let at = start + Duration::seconds(offset_secs);
    StopTimeInstance {
        stop_id: id.to_string(),
        stop_sequence: seq,
        arrival_time: offset_secs as i32,
        departure_time: offset_secs as i32,
        shape_dist_traveled: distance,
        timepoint: true,
        arrival_date_time: at,
        departure_date_time: at,
    }
}

fn trip(start: DateTime<Utc>) -> TripInstance {
    TripInstance {
        data_set_id: 1,
        trip_id: "trip42".to_string(),
        route_id: "R1".to_string(),
        stop_time_instances: vec![stop("A", 1, start, 0, 0.0), stop("B", 2, start, 1200, 1000.0)],
    }
}

fn model() -> Model {
    Model {
        id: 7,
        version: 3,
        name: "A_B".to_string(),
        trained: true,
        avg_rmse: 60.0,
        ml_rmse: 45.0,
        average_time: 1100.0,
        median_time: 1080.0,
        observed_stop_count: 25,
    }
}

#[tokio::test]
async fn test_report_to_trip_update_through_inference() {
    // Vehicle halfway along A -> B, ten minutes into the trip
    let start = Utc::now() - Duration::seconds(600);
    let bus = Arc::new(InMemoryBus::new());
    let config = EngineConfig::default();
    let subjects = config.subjects.clone();

    let mut updates = bus.subscribe(&subjects.trip_updates, 8).await.unwrap();
    let mut requests = bus.subscribe("inference-request.0", 8).await.unwrap();
    let publisher = Arc::new(BusPublisher::new(bus.clone(), subjects.trip_updates.clone()));

    let engine = Arc::new(AggregatorEngine::new(
        config,
        EngineParts {
            schedule: Arc::new(StaticScheduleProvider::new([trip(start)])),
            models: Arc::new(StaticModelRegistry::new([model()])),
            holidays: Arc::new(FixedHolidayCalendar::default()),
            bus: bus.clone(),
            publisher,
        },
    ));

    let health = HealthRegistry::new();
    for name in components::ALL {
        health.register(name).await;
    }
    let listeners = Listeners::subscribe(bus.as_ref(), &subjects, ListenerConfig::default())
        .await
        .unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = listeners.spawn(engine.clone(), health.clone(), &shutdown_tx);

    let now = Utc::now();
    let report = VehicleMonitorResults {
        observed_stop_transitions: vec![ObservedTransition {
            from_stop_id: "A".to_string(),
            to_stop_id: "B".to_string(),
            travel_seconds: 1250.0,
            observed_time: now,
        }],
        trip_deviations: vec![TripDeviation {
            data_set_id: 1,
            trip_id: "trip42".to_string(),
            route_id: "R1".to_string(),
            vehicle_id: "V1".to_string(),
            timestamp: now,
            trip_progress: 500.0,
            delay: 0,
        }],
    };
    publish_json(bus.as_ref(), &subjects.vehicle_monitor_results, &report)
        .await
        .unwrap();

    let message = timeout(WAIT, requests.next()).await.unwrap().unwrap();
    let request: InferenceRequest = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(request.ml_model_id, 7);
    assert!(request.request_id.ends_with("-trip42-7-3"));
    assert_eq!(engine.pending_summaries().await.len(), 1);

    let response = InferenceResponse {
        request_id: request.request_id,
        prediction: Some(1440.0),
        error: None,
    };
    publish_json(bus.as_ref(), &subjects.inference_response, &response)
        .await
        .unwrap();

    let message = timeout(WAIT, updates.next()).await.unwrap().unwrap();
    let update: TripUpdate = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(update.trip_id, "trip42");
    let arrival = &update.stop_time_update[1];
    assert_eq!(arrival.stop_id, "B");
    // Half the predicted 1440s remain; timestamps are whole seconds on the wire
    let remaining = (arrival.predicted_arrival_time - now).num_seconds();
    assert!((719..=720).contains(&remaining), "remaining {}", remaining);
    assert!(engine.pending_summaries().await.is_empty());
    assert_eq!(engine.transitions().len(), 1);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        timeout(WAIT, handle).await.unwrap().unwrap();
    }
    assert_eq!(health.health().await.status, ComponentStatus::Healthy);
}
