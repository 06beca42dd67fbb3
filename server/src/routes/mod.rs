pub mod api;
pub mod export;
pub mod sse;

#[cfg(test)]
pub(crate) mod test_support {
    use std::net::SocketAddr;

    use landmap_shared::LandData;
    use serde_json::json;
    use tokio::task::JoinHandle;

    use crate::services::land_poller::apply_land_data;
    use crate::state::{AppState, LandSource};
    use crate::store::BlobStore;

    pub(crate) async fn spawn_test_server(state: AppState) -> (SocketAddr, JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let app = crate::app::build_app(state);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    /// Two countries: 北境 with a capital, its area and spawn; 南岭 with one plain area.
    pub(crate) fn sample_land() -> LandData {
        LandData::from_marker_world(&json!({
            "sets": {
                "me.angeschossen.lands": {
                    "markers": {
                        "01HZX_spawn": {
                            "x": 120.0, "z": -40.0, "y": 70.0,
                            "label": "王城",
                            "desc": "这片领土属于国家北境"
                        }
                    },
                    "areas": {
                        "01HZX_1": {
                            "x": [100.0, 300.0, 300.0, 100.0],
                            "z": [-200.0, -200.0, 0.0, 0.0],
                            "label": "王城",
                            "desc": "<b>王城</b> 这片领土属于国家北境 首都：王城",
                            "color": "#112233"
                        },
                        "01J00_1": {
                            "x": [-500.0, -300.0, -300.0, -500.0],
                            "z": [400.0, 400.0, 600.0, 600.0],
                            "label": "竹林",
                            "desc": "竹林 这片领土属于国家南岭"
                        }
                    }
                }
            }
        }))
    }

    pub(crate) async fn seeded_state() -> AppState {
        let state = AppState::new(BlobStore::memory());
        apply_land_data(&state, sample_land(), LandSource::Remote)
            .await
            .expect("seed land data");
        state
    }
}
