use crate::gui_bridge::model::{ParamsUpdate, StatusView};
use log::{info, warn};
use mmwcore::{MapKind, ResultSubscriber, SessionHandle};
use serde_json::json;
use std::net::SocketAddr;
use std::thread::{self, JoinHandle};
use tokio::runtime::Builder;
use warp::http::StatusCode;
use warp::reply::{self, Json, WithStatus};
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// HTTP view of a running session: latest maps, status and parameter
/// hot-swap.
pub struct GuiBridge;

impl GuiBridge {
    pub fn routes(
        handle: SessionHandle,
    ) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
        let subscriber = handle.subscribe();
        let results = warp::any().map(move || subscriber.clone());
        let handle_filter = warp::any().map(move || handle.clone());

        let map_route = |name: &'static str, kind: MapKind| {
            warp::path(name)
                .and(warp::path::end())
                .and(warp::get())
                .and(results.clone())
                .map(move |results: ResultSubscriber| latest_reply(&results, kind))
        };

        let status_route = warp::path("status")
            .and(warp::path::end())
            .and(warp::get())
            .and(handle_filter.clone())
            .map(|handle: SessionHandle| {
                let view = StatusView::new(handle.status(), handle.params(), handle.radar());
                reply::json(&view)
            });

        let params_route = warp::path("params")
            .and(warp::path::end())
            .and(warp::post())
            .and(warp::body::content_length_limit(MAX_BODY_BYTES))
            .and(warp::body::json())
            .and(handle_filter)
            .map(|update: ParamsUpdate, handle: SessionHandle| {
                let params = update.apply(handle.params());
                match handle.update_params(params.clone()) {
                    Ok(()) => {
                        info!("[bridge] processing parameters updated");
                        reply::with_status(reply::json(&params), StatusCode::OK)
                    }
                    Err(err) => {
                        warn!("[bridge] rejected parameter update: {}", err);
                        reply::with_status(
                            reply::json(&json!({"status": "rejected", "reason": err.to_string()})),
                            StatusCode::BAD_REQUEST,
                        )
                    }
                }
            });

        map_route("range", MapKind::Range)
            .or(map_route("doppler", MapKind::RangeDoppler))
            .or(map_route("angle", MapKind::RangeAngle))
            .or(status_route)
            .or(params_route)
    }

    /// Serves the routes on a dedicated thread until the process exits.
    pub fn spawn(handle: SessionHandle, bind: SocketAddr) -> std::io::Result<JoinHandle<()>> {
        let routes = Self::routes(handle);
        let runtime = Builder::new_current_thread().enable_all().build()?;
        thread::Builder::new()
            .name("gui-bridge".into())
            .spawn(move || {
                info!("[bridge] serving on http://{}", bind);
                runtime.block_on(async move {
                    match warp::serve(routes).try_bind_ephemeral(bind) {
                        Ok((_, server)) => server.await,
                        Err(err) => warn!("[bridge] cannot bind {}: {}", bind, err),
                    }
                });
            })
    }
}

fn latest_reply(results: &ResultSubscriber, kind: MapKind) -> WithStatus<Json> {
    match results.latest(kind) {
        Some(snapshot) => reply::with_status(reply::json(&*snapshot), StatusCode::OK),
        None => reply::with_status(
            reply::json(&json!({"status": "no data", "kind": kind})),
            StatusCode::NOT_FOUND,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmwcore::{NetworkConfig, PipelineConfig, Session};
    use serde_json::Value;

    fn idle_session() -> Session {
        Session::new(PipelineConfig::default(), NetworkConfig::loopback())
    }

    #[tokio::test]
    async fn maps_are_not_found_before_the_first_frame() {
        let session = idle_session();
        let routes = GuiBridge::routes(session.handle());
        for path in ["/range", "/doppler", "/angle"] {
            let response = warp::test::request().path(path).reply(&routes).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", path);
        }
    }

    #[tokio::test]
    async fn status_reports_idle_session() {
        let session = idle_session();
        let routes = GuiBridge::routes(session.handle());
        let response = warp::test::request().path("/status").reply(&routes).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["state"], "idle");
        assert_eq!(body["radar"]["virtual_channels"], 12);
    }

    #[tokio::test]
    async fn params_post_hot_swaps_parameters() {
        let session = idle_session();
        let routes = GuiBridge::routes(session.handle());
        let response = warp::test::request()
            .method("POST")
            .path("/params")
            .json(&json!({"clutter_removal": true, "training_cells": 12}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let params = session.handle().params();
        assert!(params.clutter_removal);
        assert_eq!(params.cfar.training_cells, 12);
    }

    #[tokio::test]
    async fn invalid_params_are_rejected_and_not_applied() {
        let session = idle_session();
        let routes = GuiBridge::routes(session.handle());
        let before = session.handle().params();
        let response = warp::test::request()
            .method("POST")
            .path("/params")
            .json(&json!({"channel": {"individual": 99}}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(session.handle().params(), before);
    }

    #[tokio::test]
    async fn oversized_transforms_are_rejected() {
        let session = idle_session();
        let routes = GuiBridge::routes(session.handle());
        let before = session.handle().params();
        for body in [
            json!({"pad_factor": 1u64 << 40}),
            json!({"angle_fft_size": 1u64 << 20}),
        ] {
            let response = warp::test::request()
                .method("POST")
                .path("/params")
                .json(&body)
                .reply(&routes)
                .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        }
        assert_eq!(session.handle().params(), before);
    }
}
