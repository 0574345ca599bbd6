/// Router Module Index
///
/// Routes are split by who may reach them; the auth route layer is applied to the
/// `authenticated` module as a whole in `create_router`.

/// Pages open to everyone. Handlers decide per viewer what to show.
pub mod public;

/// Form posts that mutate remote state. Require a fresh, authenticated session.
pub mod authenticated;
