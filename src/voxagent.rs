use std::sync::Arc;

use anyhow::{Context, Result};
use arboard::Clipboard;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use tao::event::{Event, StartCause};
use tao::event_loop::{ControlFlow, EventLoop, EventLoopBuilder};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tray_icon::menu::{AboutMetadataBuilder, Menu, MenuEvent, MenuItem, PredefinedMenuItem};
use tray_icon::TrayIconBuilder;
use voxagent::config_ext::ConfigExt;
use voxagent::event::AppEvent;
use voxagent::hotkey::HotkeyTrigger;
use voxagent::icon::{TrayStatus, tooltip};
use voxagent::intent::IntentResolver;
use voxagent::notify::NotificationLayer;
use voxagent::session::{Collaborators, Orchestrator, SessionSettings};
use voxagent::tools::{Desktop, ToolRegistry, register_builtin_tools};
use voxagent::{
    APP_NAME_PRETTY, AnthropicClient, AnthropicConfig, ChatModel, ChatProvider, ConfigManager,
    DEFAULT_LOG_LEVEL, MicRecorder, OpenAIClient, OpenAIConfig, SessionState, VERSION,
};

fn main() -> Result<()> {
    // Initialize the logger
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VOXAGENT_LOG")
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL)),
        )
        .finish()
        .with(NotificationLayer::new())
        .init();

    // Load config
    let config_manager = ConfigManager::new()?;
    let config = config_manager.load()?;
    // save back the config to create the file if it doesn't exist
    config_manager.save(&config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    // Set up hotkey
    let hotkey = config.hotkey();
    let hotkey_manager = GlobalHotKeyManager::new().context("Failed to create hotkey manager")?;
    hotkey_manager
        .register(hotkey)
        .context("Failed to register hotkey")?;

    // Model backends
    let openai = Arc::new(OpenAIClient::new(
        OpenAIConfig::new(config.openai_key.clone())
            .with_transcribe_model(config.transcribe_model.clone())
            .with_chat_model(config.chat_model.clone())
            .with_language(config.language.clone())
            .with_timeout(config.request_timeout()),
    ));
    let chat: Arc<dyn ChatModel> = match config.chat_provider {
        ChatProvider::Openai => openai.clone(),
        ChatProvider::Anthropic => Arc::new(AnthropicClient::new(
            AnthropicConfig::new(config.anthropic_key.clone())
                .with_model(config.chat_model.clone())
                .with_timeout(config.request_timeout()),
        )),
    };
    let intents = if config.llm_intent_fallback {
        IntentResolver::with_fallback(chat.clone())
    } else {
        IntentResolver::rules_only()
    };

    // Tools
    let tools = Arc::new(ToolRegistry::new());
    register_builtin_tools(&tools, &Desktop::spawn(), config.restore_clipboard);

    let (orchestrator, mut states) = Orchestrator::new(
        Collaborators {
            capture: Arc::new(MicRecorder::new()),
            transcriber: openai,
            chat,
            intents,
            tools,
        },
        SessionSettings::from_config(&config),
        runtime.handle().clone(),
    );

    // Gestures drive the orchestrator
    let trigger = HotkeyTrigger::new(config.thresholds(), runtime.handle().clone());
    {
        let orchestrator = orchestrator.clone();
        trigger.on_trigger(Arc::new(move |mode| orchestrator.trigger(mode)));
    }
    {
        let orchestrator = orchestrator.clone();
        trigger.on_release(Arc::new(move || orchestrator.release()));
    }
    trigger.register();

    // Create the tray menu
    let mut clipboard = Clipboard::new()?;
    let tray_menu = Menu::new();
    let icon_quit = MenuItem::new("Quit", true, None);
    let icon_copy_config = MenuItem::new("Copy config path", true, None);
    tray_menu.append_items(&[
        // the name of the app
        &MenuItem::new(APP_NAME_PRETTY, false, None),
        &PredefinedMenuItem::separator(),
        &PredefinedMenuItem::about(
            None,
            Some(
                AboutMetadataBuilder::new()
                    .version(Some(VERSION.to_owned()))
                    .build(),
            ),
        ),
        &icon_copy_config,
        &PredefinedMenuItem::separator(),
        &icon_quit,
    ])?;

    // Set up the event loop
    let mut icon_tray = None;

    let menu_channel = MenuEvent::receiver();
    let hotkey_channel = GlobalHotKeyEvent::receiver();

    let event_loop: EventLoop<AppEvent> = EventLoopBuilder::with_user_event().build();
    let event_sender = event_loop.create_proxy();

    // Forward session states to the event loop, in order
    runtime.spawn(async move {
        while let Some(state) = states.recv().await {
            if event_sender.send_event(AppEvent::StateChanged(state)).is_err() {
                break;
            }
        }
        warn!("Session state forwarding ended");
    });

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Wait;

        if let Event::NewEvents(StartCause::Init) = event {
            // We create the icon once the event loop is actually running
            // to prevent issues like https://github.com/tauri-apps/tray-icon/issues/90
            let mut builder = TrayIconBuilder::new()
                .with_menu(Box::new(tray_menu.clone()))
                .with_tooltip(tooltip(&SessionState::Idle));
            match TrayStatus::Idle.icon() {
                Ok(icon) => builder = builder.with_icon(icon),
                Err(e) => error!("Failed to render tray icon: {}", e),
            }
            match builder.build() {
                Ok(tray) => {
                    icon_tray.replace(tray);
                }
                Err(e) => error!("Failed to create tray icon: {}", e),
            }

            // We have to request a redraw here to have the icon actually show up.
            // Tao only exposes a redraw method on the Window so we use core-foundation directly.
            #[cfg(target_os = "macos")]
            unsafe {
                use core_foundation::runloop::{CFRunLoopGetMain, CFRunLoopWakeUp};

                let rl = CFRunLoopGetMain();
                CFRunLoopWakeUp(rl);
            }

            info!(hotkey = ?hotkey, "{} ready", APP_NAME_PRETTY);
        }

        if let Ok(event) = menu_channel.try_recv() {
            if event.id == icon_quit.id() {
                trigger.unregister();
                if let Err(e) = hotkey_manager.unregister(hotkey) {
                    warn!("Failed to unregister hotkey: {}", e);
                }
                orchestrator.cancel();
                icon_tray.take();
                *control_flow = ControlFlow::Exit;
            } else if event.id == icon_copy_config.id() {
                if let Err(e) =
                    clipboard.set_text(config_manager.config_path().to_string_lossy().into_owned())
                {
                    error!("Failed to copy config path to clipboard: {}", e);
                }
            }
        }

        // Session states from the orchestrator
        if let Event::UserEvent(AppEvent::StateChanged(state)) = &event {
            if let Some(tray) = icon_tray.as_ref() {
                match TrayStatus::from(state).icon() {
                    Ok(icon) => {
                        if let Err(e) = tray.set_icon(Some(icon)) {
                            warn!("Failed to update tray icon: {}", e);
                        }
                    }
                    Err(e) => warn!("Failed to render tray icon: {}", e),
                }
                if let Err(e) = tray.set_tooltip(Some(tooltip(state))) {
                    warn!("Failed to update tray tooltip: {}", e);
                }
            }
        }

        // Hotkey edges feed the gesture recognizer
        while let Ok(event) = hotkey_channel.try_recv() {
            if event.id() != hotkey.id() {
                continue;
            }
            match event.state() {
                HotKeyState::Pressed => trigger.key_down(),
                HotKeyState::Released => trigger.key_up(),
            }
        }
    });
}
