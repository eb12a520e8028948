use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use coursebook::{
    Config,
    admin::{CourseForm, CourseManager},
    api::ApiClient,
    auth::Viewer,
    authoring::{ContentTreeStore, LessonField},
    content::{EditorCommand, MarkupEngine, RenderedSections, sanitize_html},
    error::{AppError, AppResult, run_with_error_handler},
    learning::{Catalog, CourseDetail, Dashboard, LearningPlayer},
    model::{
        CourseId, ModuleId, SubModuleId,
        entity::{Difficulty, SubModule},
    },
    view::{LessonPane, LoadState},
};

#[derive(Parser, Debug)]
#[command(about = "Terminal front-end for the course platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Create an account and sign in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },

    /// Forget the stored session
    Logout,

    /// Show who is signed in
    Whoami,

    /// List published courses
    Courses {
        #[arg(long)]
        category: Option<String>,
    },

    /// Show one course and whether you are enrolled
    Course { id: CourseId },

    /// Enroll in a course
    Enroll { id: CourseId },

    /// List your enrollments
    Dashboard,

    /// Open a course in the lesson player
    Learn {
        id: CourseId,
        /// Lesson to open instead of the first one
        #[arg(long)]
        lesson: Option<SubModuleId>,
        /// Mark the open lesson as completed
        #[arg(long, default_value_t = false)]
        complete: bool,
    },

    /// Edit a course's modules and lessons
    Author {
        #[command(subcommand)]
        action: AuthorCommands,
    },

    /// Manage courses
    Admin {
        #[command(subcommand)]
        action: AdminCommands,
    },

    /// Print the render-safe version of an HTML file
    Sanitize { file: PathBuf },
}

/// Module and lesson authoring
#[derive(Subcommand, Debug)]
pub enum AuthorCommands {
    Tree {
        course: CourseId,
    },
    AddModule {
        course: CourseId,
        title: String,
    },
    RenameModule {
        course: CourseId,
        module: ModuleId,
        title: String,
    },
    DeleteModule {
        course: CourseId,
        module: ModuleId,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    AddLesson {
        course: CourseId,
        module: ModuleId,
        title: String,
    },
    DeleteLesson {
        course: CourseId,
        module: ModuleId,
        lesson: SubModuleId,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    EditLesson {
        course: CourseId,
        lesson: SubModuleId,
        /// title, video, intro, body or summary
        #[arg(long)]
        field: LessonField,
        #[arg(long, conflicts_with = "file")]
        value: Option<String>,
        /// Read the new value from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Editor command applied to intro, body or summary (bold, h2, quote, link, video, ...)
        #[arg(long = "format")]
        formats: Vec<EditorCommand>,
        /// Answer for link, image and video commands
        #[arg(long)]
        url: Option<String>,
    },
    Preview {
        course: CourseId,
        lesson: SubModuleId,
    },
}

/// Course management
#[derive(Subcommand, Debug)]
pub enum AdminCommands {
    List,
    TogglePublished {
        id: CourseId,
    },
    Delete {
        id: CourseId,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        difficulty: Option<Difficulty>,
    },
}

#[tokio::main]
async fn main() {
    run_with_error_handler(run).await;
}

async fn run() -> AppResult<()> {
    coursebook::setup_trace();
    let args = Cli::parse();
    let use_local = cfg!(debug_assertions);

    let (api, mut session) = coursebook::build_client(use_local).await?;
    session.init(api.as_ref())?;
    let indicator = Config::get_or_init(use_local).await.editor().save_indicator();

    match args.command {
        Commands::Login { email, password } => {
            let user = session.login(api.as_ref(), &email, &password).await?;
            println!("Signed in as {} ({})", user.name(), user.role());
        }
        Commands::Register {
            name,
            email,
            password,
        } => {
            let user = session
                .register(api.as_ref(), &name, &email, &password)
                .await?;
            println!("Welcome, {}", user.name());
        }
        Commands::Logout => {
            session.logout(api.as_ref())?;
            println!("Signed out");
        }
        Commands::Whoami => match session.refresh_user(api.as_ref()).await? {
            Viewer::Anonymous => println!("Not signed in"),
            Viewer::Learner(user) | Viewer::Admin(user) => {
                println!("{} <{}> ({})", user.name(), user.email(), user.role())
            }
        },

        Commands::Courses { category } => {
            let mut catalog = Catalog::new(api);
            catalog.load().await;
            ensure_loaded(catalog.state(), "catalog")?;
            catalog.select_category(category);

            if !catalog.categories().is_empty() {
                println!("categories: {}", catalog.categories().join(", "));
            }
            for course in catalog.filtered() {
                println!(
                    "{:>5}  {}  [{}] {} modules, {} lessons",
                    course.id(),
                    course.title(),
                    course.category().unwrap_or("-"),
                    course.module_count(),
                    course.total_sub_modules(),
                );
            }
        }
        Commands::Course { id } => {
            let mut detail = CourseDetail::new(api);
            detail.load(id, session.viewer().is_signed_in()).await;
            ensure_loaded(detail.state(), "course")?;

            if let Some(course) = detail.course() {
                println!("{}", course.title());
                if let Some(description) = course.description() {
                    println!("{description}");
                }
                for module in course.modules() {
                    println!("  {} ({} lessons)", module.title(), module.sub_module_count());
                }
            }
            println!("enrolled: {}", detail.is_enrolled());
        }
        Commands::Enroll { id } => {
            let mut detail = CourseDetail::new(api);
            detail.load(id, session.viewer().is_signed_in()).await;
            ensure_loaded(detail.state(), "course")?;
            detail
                .enroll(session.viewer())
                .await
                .map_err(|e| AppError::usage(e.to_string()))?;
            println!("Enrolled in course {id}");
        }
        Commands::Dashboard => {
            let mut dashboard = Dashboard::new(api);
            dashboard.load().await;
            ensure_loaded(dashboard.state(), "dashboard")?;
            for enrollment in dashboard.enrollments() {
                println!(
                    "{:>5}  {:<40} {:>3}%  {}",
                    enrollment.course_id(),
                    enrollment.course_title().unwrap_or("-"),
                    enrollment.progress_percentage(),
                    enrollment.status(),
                );
            }
        }
        Commands::Learn {
            id,
            lesson,
            complete,
        } => learn(api, id, lesson, complete).await?,

        Commands::Author { action } => author(api, action, indicator).await?,
        Commands::Admin { action } => admin(api, action).await?,

        Commands::Sanitize { file } => {
            let html = std::fs::read_to_string(file)?;
            println!("{}", sanitize_html(&html));
        }
    }

    Ok(())
}

async fn learn(
    api: Arc<ApiClient>,
    id: CourseId,
    lesson: Option<SubModuleId>,
    complete: bool,
) -> AppResult<()> {
    let mut player = LearningPlayer::new(api);
    player.load(id).await;
    ensure_loaded(player.state(), "course")?;

    if let Some(lesson) = lesson {
        player.select_lesson(lesson).await?;
    }
    if complete && player.mark_complete().await? {
        println!("Marked as completed");
    }

    if let Some(course) = player.course() {
        println!("{}  ({}% complete)", course.title(), player.progress_percentage());
    }
    for module in player.tree().modules() {
        let open = player.is_expanded(module.id());
        println!("{} {}", if open { "-" } else { "+" }, module.title());
        if !open {
            continue;
        }
        for entry in player.tree().lessons_of(module.id()) {
            let mark = if player.is_completed(entry.id()) { "x" } else { " " };
            println!("    [{mark}] {:>5}  {}", entry.id(), entry.title());
        }
    }

    if let LessonPane::Ready(lesson) = player.lesson_pane() {
        print_lesson(lesson);
    }
    Ok(())
}

async fn author(api: Arc<ApiClient>, action: AuthorCommands, indicator: Duration) -> AppResult<()> {
    let course = match &action {
        AuthorCommands::Tree { course }
        | AuthorCommands::AddModule { course, .. }
        | AuthorCommands::RenameModule { course, .. }
        | AuthorCommands::DeleteModule { course, .. }
        | AuthorCommands::AddLesson { course, .. }
        | AuthorCommands::DeleteLesson { course, .. }
        | AuthorCommands::EditLesson { course, .. }
        | AuthorCommands::Preview { course, .. } => *course,
    };
    let mut store = ContentTreeStore::new(api).with_indicator_ttl(indicator);
    store.load_course(course).await;
    ensure_loaded(store.state(), "course")?;

    match action {
        AuthorCommands::Tree { .. } => {}
        AuthorCommands::AddModule { title, .. } => {
            if store.add_module(&title).await?.is_none() {
                return Err(AppError::usage("module title must not be blank"));
            }
        }
        AuthorCommands::RenameModule { module, title, .. } => {
            if !store.rename_module(module, &title).await? {
                return Err(AppError::usage("module title must not be blank"));
            }
        }
        AuthorCommands::DeleteModule { module, yes, .. } => {
            let mut confirm = confirmation(yes);
            store.delete_module(module, &mut confirm).await?;
        }
        AuthorCommands::AddLesson { module, title, .. } => {
            if store.add_lesson(module, &title).await?.is_none() {
                return Err(AppError::usage("lesson title must not be blank"));
            }
        }
        AuthorCommands::DeleteLesson {
            module,
            lesson,
            yes,
            ..
        } => {
            let mut confirm = confirmation(yes);
            store.delete_lesson(lesson, module, &mut confirm).await?;
        }
        AuthorCommands::EditLesson {
            lesson,
            field,
            value,
            file,
            formats,
            url,
            ..
        } => {
            let value = match (value, file) {
                (Some(value), _) => Some(value),
                (None, Some(file)) => Some(std::fs::read_to_string(file)?),
                (None, None) if !formats.is_empty() => None,
                (None, None) => {
                    return Err(AppError::usage("pass --value, --file or --format"));
                }
            };
            if !formats.is_empty() && !field.is_rich_text() {
                return Err(AppError::usage("--format applies to intro, body or summary"));
            }
            store.select_lesson(lesson).await?;

            let mut form = store.form();
            if field.is_rich_text() {
                form.edit_rich_text(field, MarkupEngine::default(), |editor| {
                    if let Some(value) = &value {
                        editor.edit(|engine| engine.replace(value));
                    }
                    let mut prompt = |_: &str| url.clone();
                    for command in formats {
                        if !editor.execute(command, &mut prompt) {
                            tracing::warn!("{} changed nothing", command.title());
                        }
                    }
                });
            } else if let Some(value) = value {
                form.update_field(field, value);
            }
            if !form.save().await? {
                return Err(AppError::usage("lesson title must not be blank"));
            }
            if form.state().show_saved() {
                println!("Saved");
            }
        }
        AuthorCommands::Preview { lesson, .. } => {
            store.select_lesson(lesson).await?;
            let mut form = store.form();
            form.toggle_preview();
            if let Some(sections) = form.rendered() {
                print_sections(&sections);
            }
            return Ok(());
        }
    }

    print_tree(&store);
    Ok(())
}

async fn admin(api: Arc<ApiClient>, action: AdminCommands) -> AppResult<()> {
    match action {
        AdminCommands::Create {
            title,
            description,
            category,
            difficulty,
        } => {
            let mut form = CourseForm::new_course(api);
            let draft = form.draft_mut();
            draft.title = title;
            draft.description = description;
            draft.category = category;
            draft.difficulty = difficulty;

            match form.save().await? {
                Some(course) => println!("Course created: {} ({})", course.title(), course.id()),
                None => return Err(AppError::usage("course title must not be blank")),
            }
            return Ok(());
        }
        action => {
            let mut manager = CourseManager::new(api);
            manager.load().await;
            ensure_loaded(manager.state(), "courses")?;

            match action {
                AdminCommands::TogglePublished { id } => {
                    let published = manager.toggle_published(id).await?;
                    println!("Course {id} is now {}", if published { "published" } else { "a draft" });
                }
                AdminCommands::Delete { id, yes } => {
                    let mut confirm = confirmation(yes);
                    if manager.delete(id, &mut confirm).await? {
                        println!("Course {id} deleted");
                    }
                }
                _ => {}
            }

            for course in manager.courses() {
                println!(
                    "{:>5}  {:<40} {}",
                    course.id(),
                    course.title(),
                    if course.is_published() { "published" } else { "draft" },
                );
            }
        }
    }
    Ok(())
}

fn ensure_loaded(state: &LoadState, what: &str) -> AppResult<()> {
    match state {
        LoadState::Loaded => Ok(()),
        LoadState::NotFound => Err(AppError::usage(format!("{what} not found"))),
        LoadState::Failed(message) => Err(AppError::usage(format!("{what}: {message}"))),
        LoadState::Idle | LoadState::Loading => Err(AppError::usage(format!("{what} did not load"))),
    }
}

/// `--yes` answers up front, otherwise ask on the terminal.
fn confirmation(yes: bool) -> impl FnMut(&str) -> bool {
    move |message: &str| {
        if yes {
            return true;
        }
        eprint!("{message} [y/N] ");
        let _ = io::stderr().flush();

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

fn print_tree<A>(store: &ContentTreeStore<A>) {
    let selected = store.selected_lesson().map(SubModule::id);
    for module in store.tree().modules() {
        let open = store.is_expanded(module.id());
        println!(
            "{} {:>5}  {} ({} lessons)",
            if open { "-" } else { "+" },
            module.id(),
            module.title(),
            module.lesson_count(),
        );
        if !open {
            continue;
        }
        for entry in store.tree().lessons_of(module.id()) {
            let mark = if Some(entry.id()) == selected { ">" } else { " " };
            println!("   {mark} {:>5}  {}", entry.id(), entry.title());
        }
    }
}

fn print_lesson(lesson: &SubModule) {
    println!();
    println!("## {}", lesson.title());
    if let Some(read_time) = lesson.read_time() {
        println!("({read_time} read)");
    }
    if let Some(video) = lesson.video_url() {
        println!("video: {video}");
    }
    print_sections(&RenderedSections::from(lesson));

    for (index, question) in lesson.mcq_questions().iter().enumerate() {
        println!("Q{}. {}", index + 1, question.question());
        for (label, option) in question.options() {
            println!("   {label}) {option}");
        }
    }
}

fn print_sections(sections: &RenderedSections) {
    let parts = [
        ("intro", &sections.intro),
        ("body", &sections.body),
        ("summary", &sections.summary),
    ];
    for (name, html) in parts {
        if let Some(html) = html {
            println!("--- {name} ---");
            println!("{html}");
        }
    }
}
