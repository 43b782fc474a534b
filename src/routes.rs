use crate::{
    api::{announcement, fee_outline, message, salary, school_class},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    error::extractor_errors,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-route limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let requests_per_min = requests_per_min.max(1);
        let per_ms = (60_000 / requests_per_min as u64).max(1);
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .unwrap_or_default();
        Governor::new(&cfg)
    }

    let login_limiter = Arc::new(build_limiter(config.rate_login_per_min));
    let register_limiter = Arc::new(build_limiter(config.rate_register_per_min));
    let refresh_limiter = Arc::new(build_limiter(config.rate_refresh_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Public routes
    cfg.service(
        web::scope("/auth")
            .configure(extractor_errors)
            .service(
                web::resource("/login")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::login)),
            )
            .service(
                web::resource("/register")
                    .wrap(register_limiter.clone())
                    .route(web::post().to(handlers::register)),
            )
            .service(
                web::resource("/refresh")
                    .wrap(refresh_limiter.clone())
                    .route(web::post().to(handlers::refresh_token)),
            )
            .service(
                web::resource("/logout")
                    .wrap(login_limiter.clone())
                    .route(web::post().to(handlers::logout)),
            ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(handlers::me)
            .configure(api_routes),
    );
}

/// Resource tree under the API prefix. Static segments are registered before
/// `{id}` so that e.g. `/salaries/report` is not parsed as an id.
pub fn api_routes(cfg: &mut web::ServiceConfig) {
    extractor_errors(cfg);

    cfg.service(
        web::scope("/fee-outlines")
            // /fee-outlines
            .service(
                web::resource("")
                    .route(web::post().to(fee_outline::create_fee_outline))
                    .route(web::get().to(fee_outline::list_fee_outlines)),
            )
            // /fee-outlines/class/{class_id}
            .service(
                web::resource("/class/{class_id}")
                    .route(web::get().to(fee_outline::list_by_class)),
            )
            // /fee-outlines/class/{class_id}/default
            .service(
                web::resource("/class/{class_id}/default")
                    .route(web::get().to(fee_outline::get_default)),
            )
            // /fee-outlines/{id}
            .service(
                web::resource("/{id}")
                    .route(web::get().to(fee_outline::get_fee_outline))
                    .route(web::put().to(fee_outline::update_fee_outline))
                    .route(web::delete().to(fee_outline::delete_fee_outline)),
            )
            // /fee-outlines/{id}/duplicate
            .service(
                web::resource("/{id}/duplicate")
                    .route(web::post().to(fee_outline::duplicate_fee_outline)),
            ),
    )
    .service(
        web::scope("/salaries")
            .service(
                web::resource("")
                    .route(web::post().to(salary::create_salary))
                    .route(web::get().to(salary::list_salaries)),
            )
            .service(web::resource("/report").route(web::get().to(salary::payroll_report)))
            .service(web::resource("/stats").route(web::get().to(salary::salary_stats)))
            // /salaries/employee/{employee_id}/history
            .service(
                web::resource("/employee/{employee_id}/history")
                    .route(web::get().to(salary::salary_history)),
            )
            .service(
                web::resource("/{id}")
                    .route(web::get().to(salary::get_salary))
                    .route(web::put().to(salary::update_salary))
                    .route(web::delete().to(salary::delete_salary)),
            )
            .service(
                web::resource("/{id}/status")
                    .route(web::patch().to(salary::update_salary_status)),
            ),
    )
    .service(
        web::scope("/announcements")
            .service(
                web::resource("")
                    .route(web::post().to(announcement::create_announcement))
                    .route(web::get().to(announcement::list_announcements)),
            )
            // /announcements/me
            .service(web::resource("/me").route(web::get().to(announcement::list_for_user)))
            .service(
                web::resource("/{id}")
                    .route(web::get().to(announcement::get_announcement))
                    .route(web::put().to(announcement::update_announcement))
                    .route(web::delete().to(announcement::delete_announcement)),
            )
            .service(web::resource("/{id}/read").route(web::post().to(announcement::mark_read)))
            .service(web::resource("/{id}/stats").route(web::get().to(announcement::read_stats)))
            .service(web::resource("/{id}/pin").route(web::patch().to(announcement::toggle_pin))),
    )
    .service(
        web::scope("/messages")
            .service(
                web::resource("")
                    .route(web::post().to(message::send_message))
                    .route(web::get().to(message::list_inbox)),
            )
            .service(web::resource("/sent").route(web::get().to(message::list_sent)))
            .service(web::resource("/unread-count").route(web::get().to(message::unread_count)))
            .service(web::resource("/{id}").route(web::delete().to(message::delete_message)))
            .service(web::resource("/{id}/read").route(web::patch().to(message::mark_read))),
    )
    .service(web::resource("/users").route(web::post().to(handlers::create_user)))
    .service(web::resource("/classes").route(web::get().to(school_class::list_classes)));
}

// LOGIN
//  ├─ access_token (15 min)
//  └─ refresh_token (7 days)

// API REQUEST
//  └─ Authorization: Bearer access_token

// ACCESS EXPIRED
//  └─ POST /auth/refresh with refresh_token
//       └─ rotates both tokens
