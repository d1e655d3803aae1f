//! `leaddesk` operator CLI.
//!
//! Every invocation loads the config, connects the configured backend,
//! restores the last session and resolves it, runs one command, lets the
//! session controller catch up with whatever the command changed, then prints
//! JSON. Failures print a `UserNotice` on stderr and exit non-zero.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;

use leaddesk_lib::backend::{self, SignUpOutcome};
use leaddesk_lib::invite::FilePendingInvite;
use leaddesk_lib::services::intake::IntakeDraft;
use leaddesk_lib::services::invitations::InviteOutcome;
use leaddesk_lib::services::{auth, invitations, leads, projects};
use leaddesk_lib::state::{self, AppState};
use leaddesk_lib::types::{Lead, LeadImage, LeadPatch, LeadStatus, ProjectFilter};
use leaddesk_lib::{policy, session, LeadDeskError, UserNotice};

#[derive(Parser)]
#[command(name = "leaddesk")]
#[command(about = "Projects, invitations and lead assignment for sales teams", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $LEADDESK_CONFIG or ~/.leaddesk/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account (admin, or staff when an invitation is pending)
    Signup(Credentials),

    /// Sign in with a password, or print the provider URL for --oauth
    Login(LoginArgs),

    Logout,

    /// Capture the invitation carried by an app link
    #[command(name = "open-link")]
    OpenLink { url: String },

    /// Show the signed-in profile and session phase
    Whoami,

    /// Projects visible to you
    Projects,

    #[command(name = "create-project")]
    CreateProject {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },

    /// Every profile in the workspace (admin)
    Team,

    /// Profiles assigned to a project (admin)
    Members { project: String },

    /// Staff who can own leads in a project
    Staff { project: String },

    /// Add or remove a profile from a project (admin)
    #[command(name = "toggle-member")]
    ToggleMember { profile: String, project: String },

    #[command(name = "invite-link")]
    InviteLink { project: String },

    /// Email an invitation; falls back to your mail client
    Invite {
        email: String,
        /// Defaults to the current invite target
        project: Option<String>,
    },

    /// Leads visible to you, newest first
    Leads {
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        search: Option<String>,
    },

    /// Take an unassigned lead
    Claim { lead: String },

    #[command(name = "update-lead")]
    UpdateLead(UpdateLeadArgs),

    #[command(name = "add-lead")]
    AddLead(AddLeadArgs),

    /// Dashboard counters (admin)
    Metrics,
}

#[derive(Args)]
struct Credentials {
    email: String,
    #[arg(long)]
    password: String,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(required_unless_present = "oauth")]
    email: Option<String>,
    #[arg(long, required_unless_present = "oauth")]
    password: Option<String>,
    /// Identity provider, e.g. google
    #[arg(long, conflicts_with_all = ["email", "password"])]
    oauth: Option<String>,
}

#[derive(Args)]
struct UpdateLeadArgs {
    lead: String,
    #[arg(long)]
    status: Option<String>,
    /// New owner's profile id
    #[arg(long, conflicts_with = "unassign")]
    owner: Option<String>,
    /// Return the lead to the unassigned pool
    #[arg(long)]
    unassign: bool,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    budget: Option<String>,
}

#[derive(Args)]
struct AddLeadArgs {
    #[arg(long)]
    name: String,
    /// National number; non-digits are ignored
    #[arg(long)]
    contact: String,
    /// Defaults to your first assigned project
    #[arg(long)]
    project: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    city: Option<String>,
    #[arg(long)]
    profession: Option<String>,
    #[arg(long)]
    budget: Option<String>,
    #[arg(long)]
    pref_location: Option<String>,
    #[arg(long)]
    source: Option<String>,
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    prop_pref: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    /// Photo to attach
    #[arg(long)]
    image: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn report(err: &anyhow::Error) {
    match err.downcast_ref::<LeadDeskError>() {
        Some(e) => {
            let notice = UserNotice::from(e);
            match serde_json::to_string_pretty(&notice) {
                Ok(text) => eprintln!("{}", text),
                Err(_) => eprintln!("error: {}", e),
            }
        }
        None => eprintln!("error: {:#}", err),
    }
}

/// Lead plus what the signed-in profile may do with it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LeadRow<'a> {
    #[serde(flatten)]
    lead: &'a Lead,
    claimable: bool,
    editable: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_status(raw: &str) -> Result<LeadStatus> {
    raw.parse().map_err(anyhow::Error::msg)
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => state::config_path().map_err(anyhow::Error::msg)?,
    };
    let config = state::load_config(&config_path)
        .map_err(anyhow::Error::msg)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let backends = backend::connect(&config)?;
    let pending = Arc::new(FilePendingInvite::new(FilePendingInvite::default_path()?));
    let mut events = backends.identity.subscribe();
    let state = AppState::new(config, backends, pending);

    if let Err(e) = session::bootstrap(&state).await {
        log::warn!("Could not restore the previous session: {}", e);
    }

    execute(&state, &mut events, cli.command).await
}

async fn execute(
    state: &AppState,
    events: &mut tokio::sync::broadcast::Receiver<backend::SessionEvent>,
    command: Commands,
) -> Result<()> {
    match command {
        Commands::Signup(creds) => {
            let outcome = auth::sign_up(state, &creds.email, &creds.password).await?;
            let phase = session::pump(state, events).await?;
            match outcome {
                SignUpOutcome::SignedIn(session) => print_json(&json!({
                    "outcome": "signedIn",
                    "userId": session.user_id,
                    "email": session.email,
                    "phase": phase,
                })),
                SignUpOutcome::ConfirmationSent { email } => print_json(&json!({
                    "outcome": "confirmationSent",
                    "email": email,
                })),
            }
        }
        Commands::Login(args) => {
            if let Some(provider) = args.oauth {
                let url = auth::sign_in_with_oauth(state, &provider).await?;
                if let Err(e) = open::that(&url) {
                    log::warn!("Could not open browser: {}", e);
                }
                return print_json(&json!({ "authorizeUrl": url }));
            }
            let (Some(email), Some(password)) = (args.email, args.password) else {
                return Err(LeadDeskError::MissingField("email").into());
            };
            auth::sign_in(state, &email, &password).await?;
            session::pump(state, events).await?;
            print_json(&state.snapshot())
        }
        Commands::Logout => {
            auth::sign_out(state).await?;
            let phase = session::pump(state, events).await?;
            print_json(&json!({ "phase": phase }))
        }
        Commands::OpenLink { url } => {
            let (visible, captured) = auth::open_link(state, &url).await?;
            session::pump(state, events).await?;
            print_json(&json!({ "url": visible, "capturedProject": captured }))
        }
        Commands::Whoami => {
            let scope = state.snapshot();
            print_json(&json!({
                "phase": scope.phase,
                "profile": scope.profile,
                "inviteTarget": scope.invite_target,
                "pendingInvite": state.pending_invite.get(),
            }))
        }
        Commands::Projects => print_json(&projects::list_visible_projects(state).await?),
        Commands::CreateProject { name, description } => {
            let project =
                projects::create_project(state, &name, description.as_deref()).await?;
            print_json(&project)
        }
        Commands::Team => print_json(&projects::list_team(state).await?),
        Commands::Members { project } => {
            print_json(&projects::list_members(state, &project).await?)
        }
        Commands::Staff { project } => {
            print_json(&projects::project_staff(state, &project).await?)
        }
        Commands::ToggleMember { profile, project } => {
            let updated = projects::toggle_membership(state, &profile, &project).await?;
            print_json(&updated)
        }
        Commands::InviteLink { project } => {
            print_json(&json!({ "inviteLink": invitations::invite_link(state, &project)? }))
        }
        Commands::Invite { email, project } => {
            let outcome = invitations::send_invite(state, &email, project.as_deref()).await?;
            if let InviteOutcome::Fallback { mailto, .. } = &outcome {
                if let Err(e) = open::that(mailto) {
                    log::warn!("Could not open mail client: {}", e);
                }
            }
            print_json(&outcome)
        }
        Commands::Leads { project, search } => {
            let filter = ProjectFilter::parse(project.as_deref());
            let mut found = leads::load_leads(state, &filter).await?;
            if let Some(query) = search {
                found = leads::search(&found, &query);
            }
            let profile = state.current_profile()?;
            let rows: Vec<_> = found
                .iter()
                .map(|lead| LeadRow {
                    lead,
                    claimable: policy::can_claim(&profile, lead),
                    editable: policy::can_edit(&profile, lead),
                })
                .collect();
            print_json(&rows)
        }
        Commands::Claim { lead } => print_json(&leads::claim(state, &lead).await?),
        Commands::UpdateLead(args) => {
            let patch = LeadPatch {
                status: args.status.as_deref().map(parse_status).transpose()?,
                user_id: if args.unassign {
                    Some(None)
                } else {
                    args.owner.map(Some)
                },
                client_name: args.name,
                notes: args.notes,
                budget: args.budget,
            };
            print_json(&leads::update_lead(state, &args.lead, patch).await?)
        }
        Commands::AddLead(args) => {
            let profile = state.current_profile()?;
            let mut draft = IntakeDraft::new(&profile, &state.config);
            draft.lead.client_name = args.name;
            if let Some(project) = &args.project {
                draft.set_project(project);
            }
            draft.set_contact(&args.contact);
            draft.lead.email = args.email;
            draft.lead.city = args.city;
            draft.lead.profession = args.profession;
            draft.lead.budget = args.budget;
            draft.lead.pref_location = args.pref_location;
            draft.lead.prop_pref = args.prop_pref;
            draft.lead.notes = args.notes;
            if let Some(source) = args.source {
                draft.lead.lead_source = Some(source);
            }
            if let Some(status) = args.status.as_deref() {
                draft.lead.status = parse_status(status)?;
            }
            if let Some(path) = args.image {
                let bytes = std::fs::read(&path)
                    .with_context(|| format!("reading image {}", path.display()))?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "image".to_string());
                draft.attach_image(LeadImage { file_name, bytes });
            }
            print_json(&draft.submit(state).await?)
        }
        Commands::Metrics => print_json(&leads::lead_metrics(state).await?),
    }
}
