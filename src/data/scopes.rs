//! Claims implied by the standard OpenID Connect scopes.

/// Scope to the claims it requests (OpenID Connect Core 5.4).
pub const SCOPE2CLAIMS: &[(&str, &[&str])] = &[
    ("openid", &["sub"]),
    (
        "profile",
        &[
            "name",
            "given_name",
            "family_name",
            "middle_name",
            "nickname",
            "profile",
            "picture",
            "website",
            "gender",
            "birthdate",
            "zoneinfo",
            "locale",
            "updated_at",
            "preferred_username",
        ],
    ),
    ("email", &["email", "email_verified"]),
    ("address", &["address"]),
    ("phone", &["phone_number", "phone_number_verified"]),
    ("offline_access", &[]),
];

/// Claims requested by `scope`; `None` for a scope outside the standard set.
pub fn claims_for_scope(scope: &str) -> Option<&'static [&'static str]> {
    SCOPE2CLAIMS
        .iter()
        .find(|(name, _)| *name == scope)
        .map(|(_, claims)| *claims)
}

/// Claims requested by a list of scopes, in scope order, without duplicates.
/// Unknown scopes contribute nothing.
pub fn claims_for_scopes<S: AsRef<str>>(scopes: &[S]) -> Vec<&'static str> {
    let mut claims: Vec<&'static str> = Vec::new();
    for scope in scopes {
        for claim in claims_for_scope(scope.as_ref()).unwrap_or(&[]) {
            if !claims.contains(claim) {
                claims.push(claim);
            }
        }
    }
    claims
}
