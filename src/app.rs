//! app.rs
use crate::handlers::{campaign_handler, result_handler, tracking_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.route("/track", web::get().to(tracking_handler::open_pixel_endpoint))
        .service(
            web::scope("/api")
                .service(
                    web::scope("/track/{rid}")
                        .route("/click", web::get().to(tracking_handler::click_endpoint))
                        .route("/submit", web::post().to(tracking_handler::submit_endpoint))
                        .route("/report", web::post().to(tracking_handler::report_endpoint)),
                )
                .service(
                    web::scope("/results").route(
                        "/{rid}",
                        web::get().to(result_handler::result_status_endpoint),
                    ),
                )
                .service(
                    web::scope("/campaigns")
                        .route(
                            "/test-email",
                            web::post().to(campaign_handler::send_test_email_endpoint),
                        )
                        .route(
                            "/{id}/launch",
                            web::post().to(campaign_handler::launch_campaign_endpoint),
                        ),
                ),
        );
}
